//! Key=value credential file.
//!
//! One field per line, the same layout a `.env` file uses. List fields are
//! joined with [`LIST_SEPARATOR`]; absent optional fields are left out.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::record::CredentialRecord;
use crate::error::{AuthError, Result};

/// Separator for `redirect_uris` and `scopes`.
pub const LIST_SEPARATOR: char = ',';

const CLIENT_ID: &str = "client_id";
const CLIENT_SECRET: &str = "client_secret";
const REDIRECT_URIS: &str = "redirect_uris";
const SCOPES: &str = "scopes";
const ACCESS_TOKEN: &str = "access_token";
const REFRESH_TOKEN: &str = "refresh_token";
const TOKEN_TYPE: &str = "token_type";
const EXPIRY_DATE: &str = "expiry_date";

/// Reads and writes a [`CredentialRecord`] at a fixed path.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and check the record. Required fields must be present and non-empty.
    pub fn load(&self) -> Result<CredentialRecord> {
        if !self.path.exists() {
            return Err(AuthError::StoreNotFound(self.path.clone()));
        }
        let content = fs::read_to_string(&self.path)?;
        parse(&content)
    }

    /// Overwrite the file with the full record.
    pub fn save(&self, record: &CredentialRecord) -> Result<()> {
        fs::write(&self.path, render(record))?;

        // Restrict permissions (owner-only read/write), the file holds secrets
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %self.path.display(), "credential store written");
        Ok(())
    }
}

/// Parse file content into a record.
pub fn parse(content: &str) -> Result<CredentialRecord> {
    let mut fields = HashMap::new();
    for item in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, value) = item.map_err(|e| AuthError::InvalidField {
            key: "credential file",
            reason: e.to_string(),
        })?;
        fields.insert(key, value);
    }

    let record = CredentialRecord {
        client_id: required(&fields, CLIENT_ID)?.to_string(),
        client_secret: required(&fields, CLIENT_SECRET)?.to_string(),
        redirect_uris: split_list(required(&fields, REDIRECT_URIS)?),
        scopes: split_list(required(&fields, SCOPES)?),
        access_token: optional(&fields, ACCESS_TOKEN),
        refresh_token: optional(&fields, REFRESH_TOKEN),
        token_type: optional(&fields, TOKEN_TYPE),
        expiry_date: optional(&fields, EXPIRY_DATE)
            .map(|v| {
                v.parse::<u64>().map_err(|e| AuthError::InvalidField {
                    key: EXPIRY_DATE,
                    reason: format!("{v:?}: {e}"),
                })
            })
            .transpose()?,
    };

    // A list of nothing but separators is as good as missing.
    if record.redirect_uris.is_empty() {
        return Err(AuthError::MissingField(REDIRECT_URIS));
    }
    if record.scopes.is_empty() {
        return Err(AuthError::MissingField(SCOPES));
    }
    Ok(record)
}

/// Render a record as file content.
pub fn render(record: &CredentialRecord) -> String {
    let sep = LIST_SEPARATOR.to_string();
    let mut lines = vec![
        (CLIENT_ID, record.client_id.clone()),
        (CLIENT_SECRET, record.client_secret.clone()),
        (REDIRECT_URIS, record.redirect_uris.join(&sep)),
        (SCOPES, record.scopes.join(&sep)),
    ];
    let optional = [
        (ACCESS_TOKEN, record.access_token.clone()),
        (REFRESH_TOKEN, record.refresh_token.clone()),
        (TOKEN_TYPE, record.token_type.clone()),
        (EXPIRY_DATE, record.expiry_date.map(|e| e.to_string())),
    ];
    lines.extend(
        optional
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v))),
    );

    lines
        .into_iter()
        .map(|(key, value)| format!("{key}={}\n", quote(&value)))
        .collect()
}

fn required<'a>(fields: &'a HashMap<String, String>, key: &'static str) -> Result<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingField(key))
}

fn optional(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields.get(key).filter(|v| !v.is_empty()).cloned()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

/// Double-quote values the dotenv grammar would otherwise mangle.
fn quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '$' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
