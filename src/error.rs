//! Error types for the authorization flow.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while loading credentials or running a grant.
///
/// Store and scope errors surface from [`Authorizer::load`](crate::auth::Authorizer::load)
/// and mean nothing was constructed. Listener and exchange errors fail one grant
/// attempt and never touch the credential file.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credential store not found: {}", .0.display())]
    StoreNotFound(PathBuf),

    #[error("{0} not found in credential store")]
    MissingField(&'static str),

    #[error("invalid value for {key}: {reason}")]
    InvalidField { key: &'static str, reason: String },

    #[error("{0} is not a valid scope")]
    InvalidScope(String),

    /// The callback endpoint could not be bound or died underneath us.
    #[error("callback listener failed: {0}")]
    ListenerFailure(String),

    #[error("authorization code not found in callback request")]
    MissingAuthorizationCode,

    /// The provider redirected back with an `error` parameter.
    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("token exchange failed: {0}")]
    TokenExchangeFailure(String),

    #[error("token refresh failed: {0}")]
    TokenRefreshFailure(String),

    /// The exchange succeeded but carried no usable access token.
    #[error("access token is undefined")]
    UndefinedAccessToken,

    #[error("authorization cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;
