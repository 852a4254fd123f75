use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use url::form_urlencoded;
use url::Url;

use oauth2_core::{
    AuthorizeDecision, AuthorizeEndpoint, AuthorizeError, Client, InMemoryDataHandler,
    OAuthError, OAuthRequest, OAuthResponse, TokenEndpoint,
};

fn handler() -> Arc<InMemoryDataHandler> {
    Arc::new(InMemoryDataHandler::new(vec![Client {
        id: "c1".to_string(),
        secret: "s1".to_string(),
        redirect_uris: vec!["https://app.local/cb".to_string()],
        grant_types: HashSet::new(),
    }]))
}

fn location(response: &OAuthResponse) -> &str {
    response.header_value("location").expect("Location header")
}

fn query_params(location: &str) -> HashMap<String, String> {
    let url = Url::parse(location).unwrap();
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn fragment_params(location: &str) -> HashMap<String, String> {
    let url = Url::parse(location).unwrap();
    form_urlencoded::parse(url.fragment().unwrap_or("").as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

#[tokio::test]
async fn test_implicit_grant_redirects_with_fragment() {
    let handler = handler();
    let endpoint = AuthorizeEndpoint::new(handler);

    let request = OAuthRequest::get().query_str(
        "response_type=token&client_id=c1&redirect_uri=https%3A%2F%2Fapp.local%2Fcb&state=abc",
    );
    let authorize_request = endpoint.handle_request(&request).await.unwrap();
    let response = endpoint
        .complete(
            &authorize_request,
            AuthorizeDecision::Approved {
                user_id: "alice".to_string(),
            },
        )
        .await;

    assert_eq!(response.status.as_u16(), 302);
    let location = location(&response);
    assert!(location.starts_with("https://app.local/cb#"));
    let params = fragment_params(location);
    assert!(!params["access_token"].is_empty());
    assert_eq!(params["token_type"], "Bearer");
    assert_eq!(params["expires_in"], "3600");
    assert_eq!(params["state"], "abc");
    // The fragment carries no query-string leak.
    assert!(Url::parse(location).unwrap().query().is_none());
}

#[tokio::test]
async fn test_code_grant_mints_exchangeable_code() {
    let handler = handler();
    let authorize = AuthorizeEndpoint::new(handler.clone());
    let token = TokenEndpoint::new(handler);

    let request = OAuthRequest::get().query_str(
        "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fapp.local%2Fcb&scope=read&state=xyz",
    );
    let authorize_request = authorize.handle_request(&request).await.unwrap();
    let response = authorize
        .complete(
            &authorize_request,
            AuthorizeDecision::Approved {
                user_id: "alice".to_string(),
            },
        )
        .await;

    let params = query_params(location(&response));
    assert_eq!(params["state"], "xyz");
    let code = &params["code"];

    // The minted code exchanges at the token endpoint.
    let exchanged = token
        .handle(&OAuthRequest::post().form_str(&format!(
            "grant_type=authorization_code&client_id=c1&client_secret=s1&code={code}&redirect_uri=https%3A%2F%2Fapp.local%2Fcb"
        )))
        .await;
    assert_eq!(exchanged.status.as_u16(), 200);
}

#[tokio::test]
async fn test_denial_redirects_access_denied() {
    let endpoint = AuthorizeEndpoint::new(handler());
    let request = OAuthRequest::get().query_str(
        "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fapp.local%2Fcb&state=s1",
    );
    let authorize_request = endpoint.handle_request(&request).await.unwrap();
    let response = endpoint
        .complete(&authorize_request, AuthorizeDecision::Denied)
        .await;

    let params = query_params(location(&response));
    assert_eq!(params["error"], "access_denied");
    assert_eq!(params["state"], "s1");
}

#[tokio::test]
async fn test_state_echoed_byte_for_byte() {
    let endpoint = AuthorizeEndpoint::new(handler());
    let state = "a b&c=d/ü";
    let encoded: String =
        form_urlencoded::Serializer::new(String::new())
            .append_pair("state", state)
            .finish();
    let request = OAuthRequest::get().query_str(&format!(
        "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fapp.local%2Fcb&{encoded}"
    ));
    let authorize_request = endpoint.handle_request(&request).await.unwrap();
    assert_eq!(authorize_request.state.as_deref(), Some(state));

    let response = endpoint
        .complete(
            &authorize_request,
            AuthorizeDecision::Approved {
                user_id: "alice".to_string(),
            },
        )
        .await;
    assert_eq!(query_params(location(&response))["state"], state);
}

#[tokio::test]
async fn test_unregistered_redirect_uri_answered_directly() {
    let endpoint = AuthorizeEndpoint::new(handler());
    let request = OAuthRequest::get().query_str(
        "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fevil.local%2Fcb",
    );
    let error = endpoint.handle_request(&request).await.unwrap_err();
    assert!(matches!(
        error,
        AuthorizeError::Direct(OAuthError::RedirectUriMismatch)
    ));
    // Never a redirect to an unvalidated URI.
    let response = error.into_response();
    assert_eq!(response.status.as_u16(), 400);
    assert!(response.header_value("location").is_none());
}

#[tokio::test]
async fn test_unknown_client_answered_directly() {
    let endpoint = AuthorizeEndpoint::new(handler());
    let request = OAuthRequest::get().query_str(
        "response_type=code&client_id=ghost&redirect_uri=https%3A%2F%2Fapp.local%2Fcb",
    );
    let error = endpoint.handle_request(&request).await.unwrap_err();
    assert!(matches!(
        error,
        AuthorizeError::Direct(OAuthError::InvalidClient)
    ));
}

#[tokio::test]
async fn test_bad_response_type_redirects() {
    let endpoint = AuthorizeEndpoint::new(handler());
    let request = OAuthRequest::get().query_str(
        "response_type=id_token&client_id=c1&redirect_uri=https%3A%2F%2Fapp.local%2Fcb&state=zz",
    );
    let error = endpoint.handle_request(&request).await.unwrap_err();
    let AuthorizeError::Redirect(location) = error else {
        panic!("expected redirect error");
    };
    let params = query_params(&location);
    assert_eq!(params["error"], "unsupported_response_type");
    assert_eq!(params["state"], "zz");
}

#[tokio::test]
async fn test_disallowed_scope_redirects() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![Client {
            id: "c1".to_string(),
            secret: "s1".to_string(),
            redirect_uris: vec!["https://app.local/cb".to_string()],
            grant_types: HashSet::new(),
        }])
        .allowed_scopes("read"),
    );
    let endpoint = AuthorizeEndpoint::new(handler);
    let request = OAuthRequest::get().query_str(
        "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fapp.local%2Fcb&scope=admin",
    );
    let error = endpoint.handle_request(&request).await.unwrap_err();
    let AuthorizeError::Redirect(location) = error else {
        panic!("expected redirect error");
    };
    assert_eq!(query_params(&location)["error"], "invalid_scope");
}
