//! One-shot HTTP listener for the provider's redirect.
//!
//! [`CallbackListener::bind`] claims the host/port named by the redirect URI,
//! then [`CallbackListener::wait`] serves requests until the first usable
//! authorization code arrives, the attempt fails, or the caller cancels.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{Method, StatusCode, Uri};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::consts::AUTHORIZATION_SUCCESSFUL;
use crate::error::{AuthError, Result};

/// How long to let in-flight responses drain once the outcome is known.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Where to listen, parsed from a redirect URI (`scheme://host:port/path`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl CallbackTarget {
    pub fn from_redirect_uri(uri: &str) -> Result<Self> {
        let url = url::Url::parse(uri)
            .map_err(|e| AuthError::ListenerFailure(format!("invalid redirect uri {uri:?}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AuthError::ListenerFailure(format!("redirect uri {uri:?} has no host")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AuthError::ListenerFailure(format!("redirect uri {uri:?} has no port")))?;
        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        Ok(Self { host, port, path })
    }
}

impl std::fmt::Display for CallbackTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

#[derive(Debug, Default)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
}

impl CallbackQuery {
    /// Pick `code` and `error` out of a raw query string. The first occurrence
    /// of each wins; anything else is ignored.
    fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "code" if query.code.is_none() => query.code = Some(value.into_owned()),
                "error" if query.error.is_none() => query.error = Some(value.into_owned()),
                _ => {}
            }
        }
        query
    }
}

/// State of one grant attempt, shared by every request the listener serves.
struct PendingGrant {
    path: String,
    inner: Mutex<GrantSlot>,
}

struct GrantSlot {
    /// Codes already delivered during this attempt.
    seen: HashSet<String>,
    /// Taken by whichever request settles the attempt first.
    outcome: Option<oneshot::Sender<Result<String>>>,
}

impl GrantSlot {
    /// Settle the attempt. Returns false if it was already settled.
    fn resolve(&mut self, outcome: Result<String>) -> bool {
        match self.outcome.take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl PendingGrant {
    fn new(path: String, tx: oneshot::Sender<Result<String>>) -> Self {
        Self {
            path,
            inner: Mutex::new(GrantSlot {
                seen: HashSet::new(),
                outcome: Some(tx),
            }),
        }
    }

    fn handle(&self, method: &Method, path: &str, query: CallbackQuery) -> (StatusCode, String) {
        if path != self.path {
            tracing::debug!(path, "ignoring request outside the callback path");
            return (StatusCode::NOT_FOUND, "Not Found".to_string());
        }
        if method != Method::GET {
            return (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".to_string());
        }

        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(error) = query.error.filter(|e| !e.is_empty()) {
            let msg = format!("Error: authorization was denied ({error}).");
            if slot.resolve(Err(AuthError::AuthorizationDenied(error))) {
                tracing::warn!("provider redirected with an error");
            }
            return (StatusCode::BAD_REQUEST, msg);
        }

        let Some(code) = query.code.filter(|c| !c.is_empty()) else {
            if slot.resolve(Err(AuthError::MissingAuthorizationCode)) {
                tracing::warn!("callback request carried no authorization code");
            }
            return (
                StatusCode::BAD_REQUEST,
                "Error: authorization code not found in the request.".to_string(),
            );
        };

        if !slot.seen.insert(code.clone()) {
            tracing::debug!("ignoring repeated authorization code");
            return (
                StatusCode::OK,
                "Authorization code already received.".to_string(),
            );
        }

        if slot.resolve(Ok(code)) {
            tracing::info!("authorization code received");
            (StatusCode::OK, AUTHORIZATION_SUCCESSFUL.to_string())
        } else {
            tracing::debug!("ignoring authorization code for a finished attempt");
            (
                StatusCode::OK,
                "This authorization attempt has already finished.".to_string(),
            )
        }
    }
}

async fn handle_request(
    State(grant): State<Arc<PendingGrant>>,
    method: Method,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> (StatusCode, String) {
    grant.handle(&method, uri.path(), CallbackQuery::parse(query.as_deref()))
}

/// A bound, not yet serving, callback endpoint.
pub struct CallbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    path: String,
}

impl CallbackListener {
    /// Bind the target's host and port. Fails immediately if that is impossible.
    pub async fn bind(target: &CallbackTarget) -> Result<Self> {
        let listener = TcpListener::bind((target.host.as_str(), target.port))
            .await
            .map_err(|e| AuthError::ListenerFailure(format!("failed to bind {target}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::ListenerFailure(e.to_string()))?;

        tracing::debug!(%local_addr, path = %target.path, "callback listener bound");
        Ok(Self {
            listener,
            local_addr,
            path: target.path.clone(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until one request settles the attempt, then shut down.
    ///
    /// There is no built-in timeout; cancelling `cancel` stops the listener
    /// and yields [`AuthError::Cancelled`].
    pub async fn wait(self, cancel: CancellationToken) -> Result<String> {
        let Self {
            listener,
            local_addr,
            path,
        } = self;
        let (tx, rx) = oneshot::channel();
        let grant = Arc::new(PendingGrant::new(path, tx));
        let app = Router::new().fallback(handle_request).with_state(grant);

        let shutdown = cancel.child_token();
        let server_shutdown = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
        });

        let outcome = tokio::select! {
            result = rx => result.unwrap_or_else(|_| {
                Err(AuthError::ListenerFailure("callback listener closed unexpectedly".to_string()))
            }),
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
        };

        // Late requests still get answered until the socket closes; they no longer
        // find an outcome slot, so they cannot change the result.
        shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "callback server error"),
            Ok(Err(e)) => tracing::warn!(error = %e, "callback server task failed"),
            Err(_) => {
                tracing::debug!("callback server still draining, aborting");
                server.abort();
            }
        }
        tracing::debug!(%local_addr, "callback listener stopped");

        outcome
    }
}
