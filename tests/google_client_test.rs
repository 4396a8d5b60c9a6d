use tollgate::auth::oauth::{ClientConfig, GoogleOAuthClient, OAuthClient, verify_pkce};
use tollgate::consts::now_ms;
use tollgate::error::AuthError;
use tollgate::events::TokenEvent;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT: &str = "http://localhost:3000/oauth2callback";

fn client(token_url: String) -> GoogleOAuthClient {
    GoogleOAuthClient::new(ClientConfig {
        client_id: "client.apps.googleusercontent.com".to_string(),
        client_secret: "shh".to_string(),
        redirect_uri: REDIRECT.to_string(),
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
        token_url,
    })
    .with_http_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

fn query_param(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

// ── Authorization URL ─────────────────────────────────────────────

#[test]
fn authorization_url_requests_offline_access() {
    let client = client("http://unused".to_string());
    let scopes = vec![
        "https://www.googleapis.com/auth/youtube".to_string(),
        "https://www.googleapis.com/auth/youtube.upload".to_string(),
    ];
    let url = client.authorization_url(&scopes, REDIRECT, false).unwrap();

    assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
    assert_eq!(query_param(&url, "access_type").as_deref(), Some("offline"));
    assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(&url, "redirect_uri").as_deref(), Some(REDIRECT));
    assert_eq!(
        query_param(&url, "scope").as_deref(),
        Some("https://www.googleapis.com/auth/youtube https://www.googleapis.com/auth/youtube.upload")
    );
    assert!(query_param(&url, "prompt").is_none());
}

#[test]
fn authorization_url_forces_consent() {
    let client = client("http://unused".to_string());
    let url = client.authorization_url(&[], REDIRECT, true).unwrap();
    assert_eq!(query_param(&url, "prompt").as_deref(), Some("consent"));
}

#[test]
fn authorization_url_carries_s256_challenge() {
    let client = client("http://unused".to_string());
    let url = client.authorization_url(&[], REDIRECT, false).unwrap();
    assert_eq!(
        query_param(&url, "code_challenge_method").as_deref(),
        Some("S256")
    );
    assert!(query_param(&url, "code_challenge").is_some());
}

#[test]
fn authorization_url_is_unique_per_call() {
    let client = client("http://unused".to_string());
    let a = client.authorization_url(&[], REDIRECT, false).unwrap();
    let b = client.authorization_url(&[], REDIRECT, false).unwrap();
    assert_ne!(a, b);
}

#[test]
fn verify_pkce_rejects_mismatch() {
    assert!(!verify_pkce("verifier", "not-the-challenge"));
}

// ── Code exchange ─────────────────────────────────────────────────

#[tokio::test]
async fn exchange_code_returns_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc123"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.new",
            "refresh_token": "1//new",
            "token_type": "Bearer",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/youtube"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(format!("{}/token", server.uri()));
    client.authorization_url(&[], REDIRECT, false).unwrap();
    let before = now_ms();
    let tokens = client.exchange_code("abc123").await.unwrap();

    assert_eq!(tokens.access_token.as_deref(), Some("ya29.new"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("1//new"));
    assert_eq!(tokens.token_type.as_deref(), Some("Bearer"));
    let expiry = tokens.expiry_date.unwrap();
    assert!(expiry >= before + 3_599_000);
    assert_eq!(tokens.scopes(), vec!["https://www.googleapis.com/auth/youtube"]);
}

#[tokio::test]
async fn exchange_code_surfaces_oauth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Malformed auth code."
        })))
        .mount(&server)
        .await;

    let client = client(format!("{}/token", server.uri()));
    match client.exchange_code("bad").await {
        Err(AuthError::TokenExchangeFailure(msg)) => {
            assert!(msg.contains("invalid_grant"));
            assert!(msg.contains("Malformed auth code."));
        }
        other => panic!("expected TokenExchangeFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn exchange_code_without_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.only",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;

    let client = client(format!("{}/token", server.uri()));
    let tokens = client.exchange_code("abc").await.unwrap();
    assert!(tokens.refresh_token.is_none());
    assert!(tokens.scope.is_none());
}

#[tokio::test]
async fn exchange_code_with_absurd_lifetime_does_not_overflow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.forever",
            "token_type": "Bearer",
            "expires_in": u64::MAX
        })))
        .mount(&server)
        .await;

    let client = client(format!("{}/token", server.uri()));
    let tokens = client.exchange_code("abc").await.unwrap();
    assert_eq!(tokens.expiry_date, Some(u64::MAX));
}

// ── Refresh ───────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_emits_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.refreshed",
            "refresh_token": "1//rotated",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;

    let client = client(format!("{}/token", server.uri()));
    let mut rx = client.subscribe();
    let tokens = client.refresh("1//old").await.unwrap();
    assert_eq!(tokens.access_token.as_deref(), Some("ya29.refreshed"));

    match rx.recv().await.unwrap() {
        TokenEvent::Refreshed(event) => {
            assert_eq!(event.refresh_token.as_deref(), Some("1//rotated"));
            assert_eq!(event, tokens);
        }
    }
}

#[tokio::test]
async fn failed_refresh_emits_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client(format!("{}/token", server.uri()));
    let mut rx = client.subscribe();
    assert!(matches!(
        client.refresh("1//old").await,
        Err(AuthError::TokenRefreshFailure(_))
    ));
    assert!(rx.try_recv().is_err());
}
