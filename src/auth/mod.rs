pub mod callback;
pub mod oauth;
pub mod record;
pub mod scopes;
pub mod storage;

pub use record::CredentialRecord;
pub use storage::CredentialStore;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use callback::{CallbackListener, CallbackTarget};
use oauth::{OAuthClient, Tokens};

use crate::consts::ALLOWED_SCOPES;
use crate::error::{AuthError, Result};
use crate::events::TokenEvent;

/// Where an [`Authorizer`] stands in the grant flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingCallback,
    Authenticated,
    Failed,
}

type UrlHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Record plus whatever the last write had to say about persisting it.
struct Shared {
    record: CredentialRecord,
    last_persist_error: Option<String>,
}

/// Serialised, off-runtime writes of the shared record.
///
/// The snapshot is taken while holding `gate`, so whichever write runs last
/// carries the newest record.
#[derive(Clone)]
struct Persister {
    store: CredentialStore,
    shared: Arc<Mutex<Shared>>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl Persister {
    /// Apply refreshed tokens in memory, then write the record through.
    /// A failed write is recorded in `last_persist_error`; the token stays usable.
    async fn persist_refresh(&self, tokens: &Tokens) {
        let _gate = self.gate.lock().await;
        let record = {
            let mut shared = lock(&self.shared);
            shared.record.apply_tokens(tokens);
            shared.record.clone()
        };

        let result = save_blocking(&self.store, record).await;
        let mut shared = lock(&self.shared);
        match result {
            Ok(()) => {
                shared.last_persist_error = None;
                tracing::info!(
                    rotated = tokens.refresh_token.is_some(),
                    "refreshed tokens stored"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to store refreshed tokens");
                shared.last_persist_error = Some(e.to_string());
            }
        }
    }
}

/// Owns one credential record and drives it to an authenticated state.
///
/// Construction is two-phase: [`Authorizer::load`] reads and validates the
/// credential file synchronously, [`Authorizer::authorize`] reuses a fresh
/// token or runs the interactive browser grant.
pub struct Authorizer {
    persister: Persister,
    state: watch::Sender<AuthState>,
    on_url: UrlHandler,
    client: Option<Arc<dyn OAuthClient>>,
    refresh_task: Option<JoinHandle<()>>,
    /// Held across a refresh so concurrent callers share one token request.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl Authorizer {
    /// Load the credential file and check its scopes against the allow-list.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let store = CredentialStore::new(path);
        let record = store.load()?;
        scopes::validate(&record.scopes, ALLOWED_SCOPES)?;

        tracing::debug!(path = %store.path().display(), client_id = %record.client_id, "credentials loaded");
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Ok(Self {
            persister: Persister {
                store,
                shared: Arc::new(Mutex::new(Shared {
                    record,
                    last_persist_error: None,
                })),
                gate: Arc::new(tokio::sync::Mutex::new(())),
            },
            state,
            on_url: Box::new(print_authorization_url),
            client: None,
            refresh_task: None,
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Replace how the authorization URL reaches the operator (printed by default).
    pub fn with_url_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_url = Box::new(handler);
        self
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Follow state changes, including those made while [`Authorizer::authorize`] runs.
    pub fn watch_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.persister.store
    }

    /// Snapshot of the current record.
    pub fn record(&self) -> CredentialRecord {
        lock(&self.persister.shared).record.clone()
    }

    /// The last persistence failure, cleared by the next successful write.
    pub fn last_persist_error(&self) -> Option<String> {
        lock(&self.persister.shared).last_persist_error.clone()
    }

    /// Reach the authenticated state.
    ///
    /// A fresh stored token is reused without touching the network. Otherwise
    /// the callback listener is bound, the authorization URL is handed to the
    /// operator, and the returned code is exchanged and persisted. On failure
    /// the state is [`AuthState::Failed`] and the credential file is left as it
    /// was; calling again starts a new attempt.
    pub async fn authorize(
        &mut self,
        client: Arc<dyn OAuthClient>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.client = None;

        let snapshot = self.record();
        if snapshot.is_fresh() {
            tracing::info!("stored access token is still valid");
        } else {
            match self.grant(client.as_ref(), &snapshot, cancel).await {
                Ok(record) => lock(&self.persister.shared).record = record,
                Err(e) => {
                    self.state.send_replace(AuthState::Failed);
                    tracing::error!(error = %e, "authorization failed");
                    return Err(e);
                }
            }
        }

        self.state.send_replace(AuthState::Authenticated);
        self.refresh_task = Some(spawn_refresh_persistence(
            client.subscribe(),
            self.persister.clone(),
        ));
        self.client = Some(client);
        Ok(())
    }

    /// Run one interactive grant and return the record to commit.
    async fn grant(
        &self,
        client: &dyn OAuthClient,
        snapshot: &CredentialRecord,
        cancel: CancellationToken,
    ) -> Result<CredentialRecord> {
        let redirect_uri = snapshot
            .redirect_uri()
            .ok_or(AuthError::MissingField("redirect_uris"))?;
        let target = CallbackTarget::from_redirect_uri(redirect_uri)?;
        let listener = CallbackListener::bind(&target).await?;

        let force_consent = !snapshot.has_refresh_token();
        let url = client.authorization_url(&snapshot.scopes, redirect_uri, force_consent)?;

        self.state.send_replace(AuthState::AwaitingCallback);
        tracing::info!(%target, force_consent, "waiting for authorization callback");
        (self.on_url)(&url);

        let code = listener.wait(cancel).await?;
        let tokens = client.exchange_code(&code).await?;
        if tokens.access_token.as_deref().is_none_or(str::is_empty) {
            return Err(AuthError::UndefinedAccessToken);
        }

        let mut record = snapshot.clone();
        record.apply_tokens(&tokens);
        {
            let _gate = self.persister.gate.lock().await;
            save_blocking(&self.persister.store, record.clone()).await?;
        }
        tracing::info!(expiry_date = ?record.expiry_date, "tokens stored");
        Ok(record)
    }

    /// A usable access token, refreshing through the client once the stored one expires.
    ///
    /// The refreshed tokens are applied and written before this returns.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = fresh_access_token(&self.record()) {
            return Ok(token);
        }

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AuthError::TokenRefreshFailure("not authorized yet".to_string()))?;

        let _refreshing = self.refresh_gate.lock().await;
        // Someone else may have refreshed while we waited for the gate.
        let snapshot = self.record();
        if let Some(token) = fresh_access_token(&snapshot) {
            return Ok(token);
        }
        let refresh = snapshot
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::TokenRefreshFailure("no refresh token on record".to_string()))?;

        let tokens = client.refresh(&refresh).await?;
        let access = tokens
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::UndefinedAccessToken)?;

        self.persister.persist_refresh(&tokens).await;
        Ok(access)
    }
}

impl Drop for Authorizer {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

fn fresh_access_token(record: &CredentialRecord) -> Option<String> {
    if record.is_fresh() {
        record.access_token.clone()
    } else {
        None
    }
}

fn print_authorization_url(url: &str) {
    println!("Authorize this app by visiting this url:\n");
    println!("  {url}\n");
}

/// Write on the blocking pool so the runtime thread never waits on the disk.
async fn save_blocking(store: &CredentialStore, record: CredentialRecord) -> Result<()> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.save(&record))
        .await
        .map_err(|e| AuthError::Io(std::io::Error::other(e)))?
}

/// Drain refresh events and write each one through to the store.
fn spawn_refresh_persistence(
    mut rx: broadcast::Receiver<TokenEvent>,
    persister: Persister,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(TokenEvent::Refreshed(tokens)) => persister.persist_refresh(&tokens).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed token refresh events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
