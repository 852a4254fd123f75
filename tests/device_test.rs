use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;

use oauth2_core::{Client, InMemoryDataHandler, OAuthRequest, OAuthResponse, TokenEndpoint};

fn device_handler() -> Arc<InMemoryDataHandler> {
    Arc::new(
        InMemoryDataHandler::new(vec![Client {
            id: "tv".to_string(),
            secret: "s1".to_string(),
            redirect_uris: Vec::new(),
            grant_types: HashSet::new(),
        }])
        .device_interval(5),
    )
}

fn json_body(response: &OAuthResponse) -> Value {
    serde_json::from_slice(&response.body).expect("JSON body")
}

fn poll_request(device_code: &str) -> OAuthRequest {
    OAuthRequest::post().form_str(&format!(
        "grant_type=device_token&client_id=tv&client_secret=s1&device_code={device_code}"
    ))
}

#[tokio::test]
async fn test_device_issuance_advertises_interval() {
    let endpoint = TokenEndpoint::new(device_handler()).verification_uri("https://auth.local/device");
    let response = endpoint
        .handle(
            &OAuthRequest::post()
                .form_str("grant_type=device_code&client_id=tv&client_secret=s1&scope=read"),
        )
        .await;

    assert_eq!(response.status.as_u16(), 200);
    let body = json_body(&response);
    assert!(!body["device_code"].as_str().unwrap().is_empty());
    assert!(!body["user_code"].as_str().unwrap().is_empty());
    assert_eq!(body["interval"], 5);
    assert_eq!(body["verification_uri"], "https://auth.local/device");
    assert!(body["expires_in"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_device_polling_lifecycle() {
    let handler = device_handler();
    let endpoint = TokenEndpoint::new(handler.clone());

    let issued = endpoint
        .handle(&OAuthRequest::post().form_str(
            "grant_type=device_code&client_id=tv&client_secret=s1&scope=read",
        ))
        .await;
    let issued = json_body(&issued);
    let device_code = issued["device_code"].as_str().unwrap().to_string();
    let user_code = issued["user_code"].as_str().unwrap().to_string();

    // Before approval the poll is pending.
    let t0 = Utc::now();
    let pending = endpoint.handle_at(&poll_request(&device_code), t0).await;
    assert_eq!(pending.status.as_u16(), 400);
    assert_eq!(json_body(&pending)["error"], "authorization_pending");

    // A second poll inside the advertised interval is told to slow down.
    let fast = endpoint
        .handle_at(&poll_request(&device_code), t0 + Duration::seconds(2))
        .await;
    assert_eq!(json_body(&fast)["error"], "slow_down");

    // Pacing respected, still pending.
    let paced = endpoint
        .handle_at(&poll_request(&device_code), t0 + Duration::seconds(10))
        .await;
    assert_eq!(json_body(&paced)["error"], "authorization_pending");

    // The owner approves out of band; the next poll gets tokens.
    assert!(handler.approve_device_grant(&user_code, "alice").await);
    let granted = endpoint
        .handle_at(&poll_request(&device_code), t0 + Duration::seconds(20))
        .await;
    assert_eq!(granted.status.as_u16(), 200);
    let body = json_body(&granted);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "read");
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_device_denial() {
    let handler = device_handler();
    let endpoint = TokenEndpoint::new(handler.clone());

    let issued = endpoint
        .handle(&OAuthRequest::post().form_str(
            "grant_type=device_code&client_id=tv&client_secret=s1",
        ))
        .await;
    let issued = json_body(&issued);
    let device_code = issued["device_code"].as_str().unwrap().to_string();
    let user_code = issued["user_code"].as_str().unwrap().to_string();

    assert!(handler.deny_device_grant(&user_code).await);
    let response = endpoint.handle(&poll_request(&device_code)).await;
    assert_eq!(json_body(&response)["error"], "access_denied");
}

#[tokio::test]
async fn test_device_code_expiry() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![Client {
            id: "tv".to_string(),
            secret: "s1".to_string(),
            redirect_uris: Vec::new(),
            grant_types: HashSet::new(),
        }])
        .device_ttl(0),
    );
    let endpoint = TokenEndpoint::new(handler);

    let issued = endpoint
        .handle(&OAuthRequest::post().form_str(
            "grant_type=device_code&client_id=tv&client_secret=s1",
        ))
        .await;
    let device_code = json_body(&issued)["device_code"].as_str().unwrap().to_string();

    let response = endpoint
        .handle_at(&poll_request(&device_code), Utc::now() + Duration::seconds(1))
        .await;
    assert_eq!(json_body(&response)["error"], "expired_token");
}

#[tokio::test]
async fn test_device_code_of_another_client() {
    let handler = Arc::new(InMemoryDataHandler::new(vec![
        Client {
            id: "tv".to_string(),
            secret: "s1".to_string(),
            redirect_uris: Vec::new(),
            grant_types: HashSet::new(),
        },
        Client {
            id: "radio".to_string(),
            secret: "s2".to_string(),
            redirect_uris: Vec::new(),
            grant_types: HashSet::new(),
        },
    ]));
    let endpoint = TokenEndpoint::new(handler);

    let issued = endpoint
        .handle(&OAuthRequest::post().form_str(
            "grant_type=device_code&client_id=tv&client_secret=s1",
        ))
        .await;
    let device_code = json_body(&issued)["device_code"].as_str().unwrap().to_string();

    let response = endpoint
        .handle(&OAuthRequest::post().form_str(&format!(
            "grant_type=device_token&client_id=radio&client_secret=s2&device_code={device_code}"
        )))
        .await;
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}
