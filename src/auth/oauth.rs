use std::sync::Mutex;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use super::record::CredentialRecord;
use crate::consts::{GOOGLE_AUTHORIZE_URL, GOOGLE_TOKEN_URL, now_ms};
use crate::error::{AuthError, Result};
use crate::events::{EventBus, TokenEvent};

/// Token material returned by the provider. Every field is optional because
/// providers omit what did not change (most often the refresh token).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// Expiration timestamp in milliseconds since epoch.
    pub expiry_date: Option<u64>,
    /// Granted scopes as the provider sent them.
    pub scope: Option<String>,
}

impl Tokens {
    /// Granted scopes, split on whitespace or commas.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// The identity-provider side of an authorization-code grant.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Build the URL the operator opens in a browser. `force_consent` asks the
    /// provider to show the consent screen again so it issues a refresh token.
    fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        force_consent: bool,
    ) -> Result<String>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<Tokens>;

    /// Trade a refresh token for a new access token. Successful refreshes are
    /// also announced to subscribers as [`TokenEvent::Refreshed`].
    async fn refresh(&self, refresh_token: &str) -> Result<Tokens>;

    /// Subscribe to tokens rotated outside [`OAuthClient::exchange_code`].
    fn subscribe(&self) -> broadcast::Receiver<TokenEvent>;
}

/// Client identity and provider endpoints.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
}

impl ClientConfig {
    /// Google endpoints with the identity from a loaded record.
    pub fn from_record(record: &CredentialRecord) -> Self {
        Self {
            client_id: record.client_id.clone(),
            client_secret: record.client_secret.clone(),
            redirect_uri: record.redirect_uri().unwrap_or_default().to_string(),
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

/// PKCE verifier and challenge pair.
struct Pkce {
    verifier: String,
    challenge: String,
}

/// Generate a PKCE code verifier and S256 challenge.
fn generate_pkce() -> Pkce {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = pkce_challenge(&verifier);

    Pkce {
        verifier,
        challenge,
    }
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verify that a challenge was derived from the given verifier.
pub fn verify_pkce(verifier: &str, challenge: &str) -> bool {
    pkce_challenge(verifier) == challenge
}

/// What the last authorization URL committed us to for the exchange.
struct PendingAuthorization {
    verifier: String,
    redirect_uri: String,
}

/// [`OAuthClient`] for Google's OAuth 2.0 endpoints.
pub struct GoogleOAuthClient {
    config: ClientConfig,
    http: reqwest::Client,
    pending: Mutex<Option<PendingAuthorization>>,
    events: EventBus,
}

impl GoogleOAuthClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            pending: Mutex::new(None),
            events: EventBus::default(),
        }
    }

    pub fn from_record(record: &CredentialRecord) -> Self {
        Self::new(ClientConfig::from_record(record))
    }

    /// Use a preconfigured HTTP client (proxies, timeouts).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn request_tokens(&self, form: &[(&str, &str)]) -> std::result::Result<Tokens, String> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(describe_error(status, &text));
        }

        let data: TokenResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(data.into_tokens(now_ms()))
    }
}

#[async_trait]
impl OAuthClient for GoogleOAuthClient {
    fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        force_consent: bool,
    ) -> Result<String> {
        let pkce = generate_pkce();
        let scope = scopes.join(" ");

        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("access_type", "offline"),
            ("scope", scope.as_str()),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        if force_consent {
            params.push(("prompt", "consent"));
        }

        let url = url::Url::parse_with_params(&self.config.authorize_url, &params).map_err(|e| {
            AuthError::InvalidField {
                key: "authorize_url",
                reason: e.to_string(),
            }
        })?;

        let pending = PendingAuthorization {
            verifier: pkce.verifier,
            redirect_uri: redirect_uri.to_string(),
        };
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(pending);

        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<Tokens> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        let redirect_uri = pending
            .as_ref()
            .map_or(self.config.redirect_uri.as_str(), |p| p.redirect_uri.as_str());

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(p) = &pending {
            form.push(("code_verifier", p.verifier.as_str()));
        }

        self.request_tokens(&form)
            .await
            .map_err(AuthError::TokenExchangeFailure)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let tokens = self
            .request_tokens(&form)
            .await
            .map_err(AuthError::TokenRefreshFailure)?;

        let receivers = self.events.emit(TokenEvent::Refreshed(tokens.clone()));
        tracing::debug!(receivers, "token refresh announced");
        Ok(tokens)
    }

    fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.events.subscribe()
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self, now: u64) -> Tokens {
        Tokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expiry_date: self
                .expires_in
                .map(|secs| secs.saturating_mul(1000).saturating_add(now)),
            scope: self.scope,
        }
    }
}

#[derive(serde::Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Turn a failed token response into a one-line message.
fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error,
            error_description: Some(description),
        }) => format!("{status}: {error} ({description})"),
        Ok(ErrorResponse { error, .. }) => format!("{status}: {error}"),
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => format!("{status}: {body}"),
    }
}
