//! Session coordinator: the single source of truth for the current identity.
//!
//! The coordinator is the only writer of the process-wide identity value. It
//! merges token-change and refresh-requested events into one deriving loop,
//! so a burst of observers never causes more than one identity recomputation
//! per upstream event; every `user()` subscriber watches the same value
//! cell.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::ServiceConfig;
use crate::storage::StorageTier;

use super::token::{TokenEvent, TokenStore};
use super::transport::{AuthTransport, LoginRequest};

/// The materialized signed-in user record: an open-ended key/value object.
///
/// The empty record is the canonical logged-out sentinel; there is no
/// `Option<Identity>` anywhere in the public surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(serde_json::Map<String, serde_json::Value>);

impl Identity {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(|v| v.as_i64())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.get("name").and_then(|v| v.as_str())
    }

    /// Adopt an arbitrary JSON value; anything but an object becomes the
    /// empty record.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self(map),
            _ => Self::empty(),
        }
    }
}

pub struct SessionCoordinator {
    tokens: Arc<TokenStore>,
    transport: Arc<dyn AuthTransport>,
    persistent: Arc<dyn StorageTier>,
    user_key: String,
    users: watch::Sender<Identity>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl SessionCoordinator {
    /// Build the coordinator and spawn its event loop. The first loop turn
    /// derives the startup identity (hydrating from the persisted user
    /// record when a valid credential exists) before any event is handled.
    pub fn new(
        config: &ServiceConfig,
        tokens: Arc<TokenStore>,
        transport: Arc<dyn AuthTransport>,
        persistent: Arc<dyn StorageTier>,
    ) -> Arc<Self> {
        let (users, _) = watch::channel(Identity::empty());
        let (ready_tx, ready_rx) = watch::channel(false);
        let coordinator = Arc::new(Self {
            tokens,
            transport,
            persistent,
            user_key: config.user_key.clone(),
            users,
            ready_tx,
            ready_rx,
        });
        // Subscribe before spawning so no mutation between construction and
        // the first loop turn is missed.
        let events = coordinator.tokens.subscribe();
        let me = Arc::clone(&coordinator);
        tokio::spawn(async move { me.event_loop(events).await });
        coordinator
    }

    /// Resolves once the first identity derivation has run; used to gate
    /// application bootstrap.
    pub async fn init(&self) {
        let mut ready = self.ready_rx.clone();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// The current identity as a continuously observable value.
    pub fn user(&self) -> watch::Receiver<Identity> {
        self.users.subscribe()
    }

    /// Snapshot of the current identity.
    pub fn current_user(&self) -> Identity {
        self.users.borrow().clone()
    }

    /// Whether a valid credential exists.
    pub fn check(&self) -> bool {
        self.tokens.valid()
    }

    /// Authenticate against the auth service. Transport failures propagate
    /// unmodified; the caller owns their presentation.
    ///
    /// When the response carries no user record the identity is cleared, not
    /// fetched separately; it stays empty until the next token-change
    /// derivation re-hydrates from storage.
    pub async fn login(&self, request: &LoginRequest, remember: bool) -> Result<bool> {
        let response = self.transport.login(request).await?;
        self.tokens.set(response.token, remember)?;
        match response.user {
            Some(user) => {
                let identity = Identity::from_value(user);
                self.persist_user(&identity);
                self.users.send_replace(identity);
            }
            None => {
                self.users.send_replace(Identity::empty());
            }
        }
        info!(user = ?self.current_user().id(), "login completed");
        Ok(self.check())
    }

    /// Renew the credential with the stored refresh token. A failing refresh
    /// never propagates: it signs the session out locally and resolves to
    /// `false`.
    pub async fn refresh(&self) -> Result<bool> {
        let refresh_token = self.tokens.current().and_then(|c| c.refresh_token);
        match self.transport.refresh(refresh_token.as_deref()).await {
            Ok(token) => {
                let persist = self.tokens.persisted().unwrap_or(true);
                self.tokens.set(token, persist)?;
                debug!("credential refreshed");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, signing out");
                self.logout().await;
                Ok(false)
            }
        }
    }

    /// Sign out. The backend call is attempted but the local session is
    /// cleared whatever it returns.
    pub async fn logout(&self) {
        if let Err(e) = self.transport.logout().await {
            warn!(error = %e, "Logout request failed, clearing local session anyway");
        }
        self.tokens.clear();
        if let Err(e) = self.persistent.remove(&self.user_key) {
            debug!(error = %e, "Failed to remove persisted user record");
        }
        self.users.send_replace(Identity::empty());
    }

    /// Wire the API client's 401 handling to a full local sign-out.
    pub fn attach_unauthorized_hook(self: &Arc<Self>, api: &ApiClient) {
        let me = Arc::clone(self);
        api.on_unauthorized(move || {
            let me = Arc::clone(&me);
            tokio::spawn(async move { me.logout().await });
        });
    }

    async fn event_loop(self: Arc<Self>, mut events: broadcast::Receiver<TokenEvent>) {
        self.derive_identity();
        let _ = self.ready_tx.send(true);
        loop {
            match events.recv().await {
                Ok(TokenEvent::Changed(_)) => self.derive_identity(),
                Ok(TokenEvent::RefreshRequested) => {
                    let _ = self.refresh().await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Token event stream lagged, re-deriving identity");
                    self.derive_identity();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// One derivation per upstream event, shared by all observers: keep a
    /// non-empty identity while the token is valid, hydrate from storage when
    /// it is empty, clear everything when the token is invalid.
    fn derive_identity(&self) {
        let identity = if self.tokens.valid() {
            let current = self.users.borrow().clone();
            if current.is_empty() {
                self.hydrate()
            } else {
                current
            }
        } else {
            Identity::empty()
        };
        self.users.send_replace(identity);
    }

    fn hydrate(&self) -> Identity {
        match self.persistent.load(&self.user_key) {
            Ok(Some(raw)) => match serde_json::from_str::<Identity>(&raw) {
                Ok(identity) => identity,
                Err(e) => {
                    debug!(error = %e, "Persisted user record unreadable, treating as absent");
                    Identity::empty()
                }
            },
            Ok(None) => Identity::empty(),
            Err(e) => {
                debug!(error = %e, "Failed to read persisted user record");
                Identity::empty()
            }
        }
    }

    fn persist_user(&self, identity: &Identity) {
        match serde_json::to_string(identity) {
            Ok(raw) => {
                if let Err(e) = self.persistent.store(&self.user_key, &raw) {
                    warn!(error = %e, "Failed to persist user record");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize user record"),
        }
    }
}
