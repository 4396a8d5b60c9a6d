use crate::error::{AuthError, Result};

/// Check that every requested scope is in `allowed`.
///
/// Fails on the first scope that is not, naming it.
pub fn validate<S: AsRef<str>>(requested: &[S], allowed: &[&str]) -> Result<()> {
    match requested
        .iter()
        .map(AsRef::as_ref)
        .find(|scope| !allowed.contains(scope))
    {
        Some(scope) => Err(AuthError::InvalidScope(scope.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ALLOWED_SCOPES;

    #[test]
    fn accepts_subset_of_allow_list() {
        validate(&ALLOWED_SCOPES[..2], ALLOWED_SCOPES).unwrap();
    }

    #[test]
    fn accepts_full_allow_list() {
        validate(ALLOWED_SCOPES, ALLOWED_SCOPES).unwrap();
    }

    #[test]
    fn accepts_empty_request() {
        let none: [&str; 0] = [];
        validate(&none, ALLOWED_SCOPES).unwrap();
    }

    #[test]
    fn rejects_unknown_scope() {
        let err = validate(&["https://www.googleapis.com/auth/drive"], ALLOWED_SCOPES).unwrap_err();
        assert!(
            matches!(err, AuthError::InvalidScope(ref s) if s == "https://www.googleapis.com/auth/drive")
        );
    }

    #[test]
    fn names_first_invalid_scope() {
        let requested = vec![
            "https://www.googleapis.com/auth/youtube".to_string(),
            "calendar".to_string(),
            "drive".to_string(),
        ];
        match validate(&requested, ALLOWED_SCOPES) {
            Err(AuthError::InvalidScope(scope)) => assert_eq!(scope, "calendar"),
            other => panic!("expected InvalidScope, got {other:?}"),
        }
    }

    #[test]
    fn empty_allow_list_rejects_everything() {
        assert!(validate(&["a"], &[]).is_err());
    }
}
