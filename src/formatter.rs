//! Response-body encoding across the negotiated wire formats.
//!
//! The interchange value is a flat JSON object of scalars; every format
//! round-trips it (strings stay typed in JSON, stringly in XML and form
//! encoding).

use std::fmt;
use std::str::FromStr;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};
use url::form_urlencoded;

const XML_ROOT: &str = "response";

/// Body formats the token endpoint can render. Closed set; unknown `format`
/// parameter values are rejected by the dispatcher, never defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Xml,
    FormEncoded,
}

impl ResponseFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ResponseFormat::Json => "application/json",
            ResponseFormat::Xml => "application/xml",
            ResponseFormat::FormEncoded => "application/x-www-form-urlencoded",
        }
    }

    /// Encodes a flat object of scalars into body bytes.
    pub fn render(self, value: &Value) -> Vec<u8> {
        match self {
            ResponseFormat::Json => serde_json::to_vec(value).unwrap_or_default(),
            ResponseFormat::Xml => render_xml(value).unwrap_or_default(),
            ResponseFormat::FormEncoded => {
                let mut serializer = form_urlencoded::Serializer::new(String::new());
                for (key, field) in flat_fields(value) {
                    serializer.append_pair(key, &field);
                }
                serializer.finish().into_bytes()
            }
        }
    }

    /// Decodes body bytes back into a flat object. XML and form encoding
    /// yield string-valued fields; JSON preserves native types.
    pub fn parse(self, bytes: &[u8]) -> Result<Value, FormatError> {
        match self {
            ResponseFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| FormatError(e.to_string()))
            }
            ResponseFormat::Xml => parse_xml(bytes),
            ResponseFormat::FormEncoded => {
                let mut map = Map::new();
                for (k, v) in form_urlencoded::parse(bytes) {
                    map.insert(k.into_owned(), Value::String(v.into_owned()));
                }
                Ok(Value::Object(map))
            }
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ResponseFormat::Json),
            "xml" => Ok(ResponseFormat::Xml),
            "form" => Ok(ResponseFormat::FormEncoded),
            other => Err(FormatError(format!("unknown format `{other}`"))),
        }
    }
}

/// Malformed body or unknown format name.
#[derive(Debug)]
pub struct FormatError(pub String);

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FormatError {}

fn flat_fields(value: &Value) -> impl Iterator<Item = (&str, String)> {
    value
        .as_object()
        .into_iter()
        .flat_map(|map| map.iter())
        .map(|(k, v)| (k.as_str(), scalar_string(v)))
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_xml(value: &Value) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(BytesStart::new(XML_ROOT)))?;
    for (key, field) in flat_fields(value) {
        writer.write_event(Event::Start(BytesStart::new(key)))?;
        writer.write_event(Event::Text(BytesText::new(&field)))?;
        writer.write_event(Event::End(BytesEnd::new(key)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(XML_ROOT)))?;
    Ok(writer.into_inner())
}

fn parse_xml(bytes: &[u8]) -> Result<Value, FormatError> {
    let text = std::str::from_utf8(bytes).map_err(|e| FormatError(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut map = Map::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event().map_err(|e| FormatError(e.to_string()))? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if name != XML_ROOT {
                    current = Some(name);
                }
            }
            Event::Text(text) => {
                if let Some(key) = current.take() {
                    let unescaped = text.unescape().map_err(|e| FormatError(e.to_string()))?;
                    map.insert(key, Value::String(unescaped.into_owned()));
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(Value::Object(map))
}
