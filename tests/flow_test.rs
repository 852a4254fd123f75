use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use oauth2_core::{
    Client, DataHandler, GrantType, InMemoryDataHandler, OAuthRequest, OAuthResponse, TokenEndpoint,
};

fn confidential_client(id: &str, secret: &str) -> Client {
    Client {
        id: id.to_string(),
        secret: secret.to_string(),
        redirect_uris: vec!["https://app.local/cb".to_string()],
        grant_types: HashSet::new(),
    }
}

fn token_request(body: &str) -> OAuthRequest {
    OAuthRequest::post().form_str(body)
}

fn json_body(response: &OAuthResponse) -> Value {
    serde_json::from_slice(&response.body).expect("JSON body")
}

#[tokio::test]
async fn test_client_credentials_success() {
    let handler = Arc::new(InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]));
    let endpoint = TokenEndpoint::new(handler);

    let request =
        token_request("grant_type=client_credentials&client_id=c1&client_secret=s1&scope=read");
    let response = endpoint.handle(&request).await;

    assert_eq!(response.status.as_u16(), 200);
    let body = json_body(&response);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "read");
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    // No resource owner, no refresh token.
    assert!(body.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_password_flow_issues_refresh_token() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]).with_user("alice", "pw"),
    );
    let endpoint = TokenEndpoint::new(handler);

    let response = endpoint
        .handle(&token_request(
            "grant_type=password&client_id=c1&client_secret=s1&username=alice&password=pw&scope=read",
        ))
        .await;
    assert_eq!(response.status.as_u16(), 200);
    let body = json_body(&response);
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());
    assert_eq!(body["scope"], "read");
}

#[tokio::test]
async fn test_password_flow_bad_credentials() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]).with_user("alice", "pw"),
    );
    let endpoint = TokenEndpoint::new(handler);

    let response = endpoint
        .handle(&token_request(
            "grant_type=password&client_id=c1&client_secret=s1&username=alice&password=nope",
        ))
        .await;
    assert_eq!(response.status.as_u16(), 400);
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_authorization_code_exchange_and_replay() {
    let handler = Arc::new(InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]));
    let auth_info = handler
        .create_or_update_auth_info("c1", Some("alice"), Some("read"), Some("https://app.local/cb"))
        .await
        .unwrap();
    let code = auth_info.code.unwrap();
    let endpoint = TokenEndpoint::new(handler);

    let body = format!(
        "grant_type=authorization_code&client_id=c1&client_secret=s1&code={code}&redirect_uri=https%3A%2F%2Fapp.local%2Fcb"
    );
    let first = endpoint.handle(&token_request(&body)).await;
    assert_eq!(first.status.as_u16(), 200);
    assert!(!json_body(&first)["access_token"].as_str().unwrap().is_empty());

    // The code is single-use: the second exchange is a replay.
    let second = endpoint.handle(&token_request(&body)).await;
    assert_eq!(second.status.as_u16(), 400);
    assert_eq!(json_body(&second)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_authorization_code_wrong_client() {
    let handler = Arc::new(InMemoryDataHandler::new(vec![
        confidential_client("c1", "s1"),
        confidential_client("c2", "s2"),
    ]));
    let code = handler
        .create_or_update_auth_info("c1", Some("alice"), None, Some("https://app.local/cb"))
        .await
        .unwrap()
        .code
        .unwrap();
    let endpoint = TokenEndpoint::new(handler);

    let response = endpoint
        .handle(&token_request(&format!(
            "grant_type=authorization_code&client_id=c2&client_secret=s2&code={code}&redirect_uri=https%3A%2F%2Fapp.local%2Fcb"
        )))
        .await;
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_authorization_code_redirect_uri_mismatch() {
    let handler = Arc::new(InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]));
    let code = handler
        .create_or_update_auth_info("c1", Some("alice"), None, Some("https://app.local/cb"))
        .await
        .unwrap()
        .code
        .unwrap();
    let endpoint = TokenEndpoint::new(handler);

    let response = endpoint
        .handle(&token_request(&format!(
            "grant_type=authorization_code&client_id=c1&client_secret=s1&code={code}&redirect_uri=https%3A%2F%2Fevil.local%2Fcb"
        )))
        .await;
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_authorization_code_expired() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]).code_ttl(0),
    );
    let code = handler
        .create_or_update_auth_info("c1", Some("alice"), None, Some("https://app.local/cb"))
        .await
        .unwrap()
        .code
        .unwrap();
    let endpoint = TokenEndpoint::new(handler);

    let response = endpoint
        .handle(&token_request(&format!(
            "grant_type=authorization_code&client_id=c1&client_secret=s1&code={code}&redirect_uri=https%3A%2F%2Fapp.local%2Fcb"
        )))
        .await;
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_scope_narrowing() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]).with_user("alice", "pw"),
    );
    let endpoint = TokenEndpoint::new(handler);

    let issued = endpoint
        .handle(&token_request(
            "grant_type=password&client_id=c1&client_secret=s1&username=alice&password=pw&scope=read+write",
        ))
        .await;
    let refresh_token = json_body(&issued)["refresh_token"].as_str().unwrap().to_string();

    // A subset of the original scope is granted.
    let narrowed = endpoint
        .handle(&token_request(&format!(
            "grant_type=refresh_token&client_id=c1&client_secret=s1&refresh_token={refresh_token}&scope=read"
        )))
        .await;
    assert_eq!(narrowed.status.as_u16(), 200);
    assert_eq!(json_body(&narrowed)["scope"], "read");

    // A superset is not.
    let widened = endpoint
        .handle(&token_request(&format!(
            "grant_type=refresh_token&client_id=c1&client_secret=s1&refresh_token={refresh_token}&scope=read+write+admin"
        )))
        .await;
    assert_eq!(widened.status.as_u16(), 400);
    assert_eq!(json_body(&widened)["error"], "invalid_scope");
}

#[tokio::test]
async fn test_refresh_token_ownership() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![
            confidential_client("c1", "s1"),
            confidential_client("c2", "s2"),
        ])
        .with_user("alice", "pw"),
    );
    let endpoint = TokenEndpoint::new(handler);

    let issued = endpoint
        .handle(&token_request(
            "grant_type=password&client_id=c1&client_secret=s1&username=alice&password=pw",
        ))
        .await;
    let refresh_token = json_body(&issued)["refresh_token"].as_str().unwrap().to_string();

    let stolen = endpoint
        .handle(&token_request(&format!(
            "grant_type=refresh_token&client_id=c2&client_secret=s2&refresh_token={refresh_token}"
        )))
        .await;
    assert_eq!(json_body(&stolen)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_token_rotation() {
    let handler = Arc::new(
        InMemoryDataHandler::new(vec![confidential_client("c1", "s1")])
            .with_user("alice", "pw")
            .rotate_refresh_tokens(true),
    );
    let endpoint = TokenEndpoint::new(handler);

    let issued = endpoint
        .handle(&token_request(
            "grant_type=password&client_id=c1&client_secret=s1&username=alice&password=pw",
        ))
        .await;
    let old_refresh = json_body(&issued)["refresh_token"].as_str().unwrap().to_string();

    let refreshed = endpoint
        .handle(&token_request(&format!(
            "grant_type=refresh_token&client_id=c1&client_secret=s1&refresh_token={old_refresh}"
        )))
        .await;
    let new_refresh = json_body(&refreshed)["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(old_refresh, new_refresh);

    // The rotated-out token no longer refreshes.
    let replay = endpoint
        .handle(&token_request(&format!(
            "grant_type=refresh_token&client_id=c1&client_secret=s1&refresh_token={old_refresh}"
        )))
        .await;
    assert_eq!(json_body(&replay)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_unauthorized_grant_type() {
    let mut restricted = confidential_client("c1", "s1");
    restricted.grant_types = [GrantType::Password].into_iter().collect();
    let handler = Arc::new(InMemoryDataHandler::new(vec![restricted]));
    let endpoint = TokenEndpoint::new(handler);

    let response = endpoint
        .handle(&token_request(
            "grant_type=client_credentials&client_id=c1&client_secret=s1",
        ))
        .await;
    assert_eq!(response.status.as_u16(), 400);
    assert_eq!(json_body(&response)["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_flow_runs_against_request_entry_now() {
    let handler = Arc::new(InMemoryDataHandler::new(vec![confidential_client("c1", "s1")]));
    let code = handler
        .create_or_update_auth_info("c1", Some("alice"), None, Some("https://app.local/cb"))
        .await
        .unwrap()
        .code
        .unwrap();
    let endpoint = TokenEndpoint::new(handler);

    // The code is valid right now but not at a `now` past its TTL.
    let late = Utc::now() + chrono::Duration::seconds(601);
    let response = endpoint
        .handle_at(
            &token_request(&format!(
                "grant_type=authorization_code&client_id=c1&client_secret=s1&code={code}&redirect_uri=https%3A%2F%2Fapp.local%2Fcb"
            )),
            late,
        )
        .await;
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}
