//! Startup banner and credential status display.

use std::path::Path;

use crate::auth::CredentialRecord;
use crate::consts::{AUTHOR, HOMEPAGE, REPO, format_duration_ms};

/// Print the startup banner.
pub fn print_banner(credentials: &Path) {
    println!(
        r#"
   tollgate {}
   by        {}
   home      {}
   repo      {}
   file      {}
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        REPO,
        credentials.display(),
    );
}

/// Human-readable token state of a record at time `now`.
pub fn token_status(record: &CredentialRecord, now: u64) -> String {
    if !record.is_authenticated() {
        return "not authenticated".to_string();
    }
    match record.expiry_date {
        Some(expiry) if expiry > now => {
            format!("valid, expires in {}", format_duration_ms(expiry - now))
        }
        Some(expiry) => format!("expired {} ago", format_duration_ms(now - expiry)),
        None => "not authenticated".to_string(),
    }
}

/// Render the status block for a record.
pub fn status_lines(record: &CredentialRecord, now: u64) -> String {
    let refresh = if record.has_refresh_token() {
        "present"
    } else {
        "missing"
    };
    let mut out = String::new();
    out.push_str(&format!("  client    {}\n", record.client_id));
    out.push_str(&format!(
        "  redirect  {}\n",
        record.redirect_uri().unwrap_or("(none)")
    ));
    out.push_str(&format!("  token     {}\n", token_status(record, now)));
    out.push_str(&format!("  refresh   {refresh}\n"));
    out.push_str("  scopes\n");
    for scope in &record.scopes {
        out.push_str(&format!("    {scope}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(expiry: Option<u64>) -> CredentialRecord {
        CredentialRecord {
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
            redirect_uris: vec!["http://localhost:3000/cb".to_string()],
            scopes: vec!["https://www.googleapis.com/auth/youtube".to_string()],
            access_token: expiry.map(|_| "access".to_string()),
            refresh_token: expiry.map(|_| "refresh".to_string()),
            token_type: expiry.map(|_| "Bearer".to_string()),
            expiry_date: expiry,
        }
    }

    #[test]
    fn print_banner_does_not_panic() {
        print_banner(&PathBuf::from("./.env.google"));
    }

    #[test]
    fn status_for_unauthenticated_record() {
        assert_eq!(token_status(&record(None), 0), "not authenticated");
    }

    #[test]
    fn status_for_valid_token() {
        assert_eq!(token_status(&record(Some(61_000)), 1_000), "valid, expires in 1m 0s");
    }

    #[test]
    fn status_for_expired_token() {
        assert_eq!(token_status(&record(Some(1_000)), 11_000), "expired 10s ago");
    }

    #[test]
    fn status_lines_list_scopes() {
        let text = status_lines(&record(None), 0);
        assert!(text.contains("client-123"));
        assert!(text.contains("http://localhost:3000/cb"));
        assert!(text.contains("https://www.googleapis.com/auth/youtube"));
        assert!(text.contains("refresh   missing"));
    }
}
