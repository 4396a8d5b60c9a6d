pub mod auth;
pub mod banner;
pub mod consts;
pub mod error;
pub mod events;
pub mod spinner;

pub use auth::{AuthState, Authorizer};
pub use error::{AuthError, Result};
