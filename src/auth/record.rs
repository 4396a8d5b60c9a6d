use super::oauth::Tokens;
use crate::consts::{ALLOWED_SCOPES, now_ms};

/// Persisted authorization state for one client/user pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub client_id: String,
    pub client_secret: String,
    /// Only the first entry is used as the redirect target.
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// Expiration timestamp in milliseconds since epoch.
    pub expiry_date: Option<u64>,
}

impl CredentialRecord {
    /// The redirect URI the provider sends the code to.
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uris.first().map(String::as_str)
    }

    /// True once every field produced by a grant is present.
    pub fn is_authenticated(&self) -> bool {
        non_empty(&self.access_token)
            && non_empty(&self.refresh_token)
            && non_empty(&self.token_type)
            && self.expiry_date.is_some()
            && !self.scopes.is_empty()
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(now_ms())
    }

    /// Authenticated and not yet expired. Expiring exactly at `now` counts as expired.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        self.is_authenticated() && self.expiry_date.is_some_and(|expiry| expiry > now)
    }

    pub fn has_refresh_token(&self) -> bool {
        non_empty(&self.refresh_token)
    }

    /// Apply tokens from a code exchange.
    ///
    /// Fields the provider leaves out keep their previous value, so an exchange
    /// that does not rotate the refresh token keeps the one on record.
    pub fn apply_tokens(&mut self, tokens: &Tokens) {
        if let Some(access) = tokens.access_token.as_ref().filter(|t| !t.is_empty()) {
            self.access_token = Some(access.clone());
        }
        if let Some(refresh) = tokens.refresh_token.as_ref().filter(|t| !t.is_empty()) {
            self.refresh_token = Some(refresh.clone());
        }
        if let Some(token_type) = tokens.token_type.as_ref().filter(|t| !t.is_empty()) {
            self.token_type = Some(token_type.clone());
        }
        if let Some(expiry) = tokens.expiry_date {
            self.expiry_date = Some(expiry);
        }
        // Granted scopes outside the allow-list would make the file unloadable.
        let scopes: Vec<String> = tokens
            .scopes()
            .into_iter()
            .filter(|scope| ALLOWED_SCOPES.contains(&scope.as_str()))
            .collect();
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}
