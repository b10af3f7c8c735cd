//! Token store: owns the serialized credential, its expiry, and persistence.
//!
//! A credential lives in exactly one of two storage tiers at a time: the
//! durable tier when the user asked to be remembered, the session-scoped tier
//! otherwise. Every mutation emits a `TokenEvent` and re-arms the embedded
//! refresh timer; storage read or parse failures degrade to "no credential"
//! rather than propagating.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::storage::StorageTier;

use super::refresh::RefreshTimer;

/// Default token kind when the wire response omits one.
const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Capacity of the token event channel. Events are tiny and consumed by a
/// single long-lived coordinator loop; lagging only matters under test abuse.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Bearer credential as exchanged with the auth service and persisted to
/// storage. Optional fields are stripped when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Seconds-until-expiry as reported by the auth service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Absolute expiry, computed once at acceptance time and never
    /// recomputed. Absent means the credential does not expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credential {
    /// A non-expiring bearer credential with no renewal token.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            expires_in: None,
            exp: None,
            refresh_token: None,
        }
    }

    /// True while the credential is usable. No absolute expiry means it
    /// never expires.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && self.exp.map(|exp| exp > Utc::now()).unwrap_or(true)
    }
}

/// Notifications emitted by the token store.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// The stored credential changed; carries the new value (`None` on clear).
    Changed(Option<Credential>),
    /// The refresh timer fired; the credential should be renewed now.
    RefreshRequested,
}

/// Cached view of the stored credential and the tier holding it.
#[derive(Clone)]
struct StoredCredential {
    credential: Credential,
    persisted: bool,
}

pub struct TokenStore {
    persistent: Arc<dyn StorageTier>,
    session: Arc<dyn StorageTier>,
    key: String,
    refresh_lead: Duration,
    /// Outer `None` = not yet loaded from storage; inner `None` = known absent.
    cached: Mutex<Option<Option<StoredCredential>>>,
    events: broadcast::Sender<TokenEvent>,
    timer: RefreshTimer,
}

impl TokenStore {
    pub fn new(
        persistent: Arc<dyn StorageTier>,
        session: Arc<dyn StorageTier>,
        key: impl Into<String>,
        refresh_lead_secs: i64,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            persistent,
            session,
            key: key.into(),
            refresh_lead: Duration::seconds(refresh_lead_secs),
            cached: Mutex::new(None),
            events,
            timer: RefreshTimer::new(),
        }
    }

    /// Subscribe to token change and refresh-requested events.
    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.events.subscribe()
    }

    /// Store a credential in exactly one tier, filling defaults and computing
    /// the absolute expiry from `expires_in` at this moment. An empty access
    /// token is treated as a clear.
    pub fn set(&self, mut credential: Credential, persist: bool) -> Result<()> {
        if credential.access_token.is_empty() {
            self.clear();
            return Ok(());
        }
        if credential.token_type.is_empty() {
            credential.token_type = DEFAULT_TOKEN_TYPE.to_string();
        }
        if let Some(secs) = credential.expires_in {
            credential.exp = Some(Utc::now() + Duration::seconds(secs));
        }

        let serialized = serde_json::to_string(&credential)?;
        let (target, other): (&Arc<dyn StorageTier>, &Arc<dyn StorageTier>) = if persist {
            (&self.persistent, &self.session)
        } else {
            (&self.session, &self.persistent)
        };
        target.store(&self.key, &serialized)?;
        other.remove(&self.key)?;

        // The cached copy is invalidated, not updated; the next read goes
        // back through the tier that now holds the value.
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let _ = self.events.send(TokenEvent::Changed(Some(credential.clone())));
        self.rearm(&credential);
        Ok(())
    }

    /// Remove the credential from both tiers, notify subscribers with an
    /// empty value, and disarm any pending refresh. Storage failures here are
    /// logged and absorbed so a sign-out is always locally effective.
    pub fn clear(&self) {
        if let Err(e) = self.persistent.remove(&self.key) {
            debug!(error = %e, "Failed to remove credential from persistent tier");
        }
        if let Err(e) = self.session.remove(&self.key) {
            debug!(error = %e, "Failed to remove credential from session tier");
        }
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(None);
        let _ = self.events.send(TokenEvent::Changed(None));
        self.timer.disarm();
    }

    /// The stored credential, lazily loaded on first read: persistent tier
    /// first, session tier only if the persistent tier is empty.
    pub fn current(&self) -> Option<Credential> {
        self.load_slot().map(|slot| slot.credential)
    }

    /// Which tier holds the current credential, if any.
    pub fn persisted(&self) -> Option<bool> {
        self.load_slot().map(|slot| slot.persisted)
    }

    /// True iff a credential exists and has not expired.
    pub fn valid(&self) -> bool {
        self.current().map(|c| c.is_valid()).unwrap_or(false)
    }

    /// `"<kind> <token>"`, or the empty string when no valid credential exists.
    pub fn bearer_header_value(&self) -> String {
        match self.current() {
            Some(ref c) if c.is_valid() => format!("{} {}", c.token_type, c.access_token),
            _ => String::new(),
        }
    }

    /// Renewal is only attempted for credentials that declare both a refresh
    /// token and an absolute expiry.
    pub fn needs_refresh(&self) -> bool {
        self.current()
            .map(|c| c.refresh_token.is_some() && c.exp.is_some())
            .unwrap_or(false)
    }

    /// Whether a refresh is currently scheduled.
    pub fn refresh_armed(&self) -> bool {
        self.timer.is_armed()
    }

    fn rearm(&self, credential: &Credential) {
        let exp = match (&credential.refresh_token, credential.exp) {
            (Some(_), Some(exp)) => exp,
            _ => {
                self.timer.disarm();
                return;
            }
        };
        // Fire strictly before expiry; clamp to "now" when already inside
        // the lead window.
        let delay = (exp - Utc::now() - self.refresh_lead)
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        self.timer.arm(delay, self.events.clone());
    }

    fn load_slot(&self) -> Option<StoredCredential> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref slot) = *cached {
            return slot.clone();
        }
        let loaded = self
            .read_tier(&self.persistent, true)
            .or_else(|| self.read_tier(&self.session, false));
        *cached = Some(loaded.clone());
        loaded
    }

    fn read_tier(&self, tier: &Arc<dyn StorageTier>, persisted: bool) -> Option<StoredCredential> {
        let raw = match tier.load(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Failed to read stored credential");
                return None;
            }
        };
        match serde_json::from_str::<Credential>(&raw) {
            Ok(credential) => Some(StoredCredential { credential, persisted }),
            Err(e) => {
                debug!(error = %e, "Stored credential unreadable, treating as absent");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTier;

    fn store() -> (Arc<MemoryTier>, Arc<MemoryTier>, TokenStore) {
        let persistent = Arc::new(MemoryTier::new());
        let session = Arc::new(MemoryTier::new());
        let tokens = TokenStore::new(
            Arc::clone(&persistent) as Arc<dyn StorageTier>,
            Arc::clone(&session) as Arc<dyn StorageTier>,
            "app-token",
            60,
        );
        (persistent, session, tokens)
    }

    fn expiring(token: &str, expires_in: i64) -> Credential {
        Credential {
            expires_in: Some(expires_in),
            refresh_token: Some("r1".to_string()),
            ..Credential::bearer(token)
        }
    }

    #[tokio::test]
    async fn test_exactly_one_tier_holds_credential() {
        let (persistent, session, tokens) = store();

        tokens.set(Credential::bearer("t1"), true).expect("set failed");
        assert!(persistent.load("app-token").expect("load failed").is_some());
        assert!(session.load("app-token").expect("load failed").is_none());

        tokens.set(Credential::bearer("t2"), false).expect("set failed");
        assert!(persistent.load("app-token").expect("load failed").is_none());
        assert!(session.load("app-token").expect("load failed").is_some());

        tokens.clear();
        assert!(persistent.load("app-token").expect("load failed").is_none());
        assert!(session.load("app-token").expect("load failed").is_none());
    }

    #[tokio::test]
    async fn test_expiry_computed_at_acceptance() {
        let (_p, _s, tokens) = store();
        let before = Utc::now();
        tokens.set(expiring("t1", 3600), false).expect("set failed");
        let stored = tokens.current().expect("missing credential");
        let exp = stored.exp.expect("missing absolute expiry");
        assert!(exp >= before + Duration::seconds(3600));
        assert!(exp <= Utc::now() + Duration::seconds(3600));
        assert!(tokens.valid());
    }

    #[tokio::test]
    async fn test_expired_credential_is_invalid() {
        let (_p, _s, tokens) = store();
        tokens.set(expiring("t1", -1), false).expect("set failed");
        assert!(!tokens.valid());
        assert_eq!(tokens.bearer_header_value(), "");
    }

    #[tokio::test]
    async fn test_bearer_header_value() {
        let (_p, _s, tokens) = store();
        assert_eq!(tokens.bearer_header_value(), "");
        tokens.set(Credential::bearer("t1"), false).expect("set failed");
        assert_eq!(tokens.bearer_header_value(), "Bearer t1");
    }

    #[tokio::test]
    async fn test_token_type_defaults_to_bearer() {
        let (_p, _s, tokens) = store();
        let credential = Credential {
            token_type: String::new(),
            ..Credential::bearer("t1")
        };
        tokens.set(credential, false).expect("set failed");
        assert_eq!(tokens.current().expect("missing").token_type, "Bearer");
    }

    #[tokio::test]
    async fn test_needs_refresh_requires_both_fields() {
        let (_p, _s, tokens) = store();

        tokens.set(Credential::bearer("t1"), false).expect("set failed");
        assert!(!tokens.needs_refresh());

        let only_refresh = Credential {
            refresh_token: Some("r1".to_string()),
            ..Credential::bearer("t1")
        };
        tokens.set(only_refresh, false).expect("set failed");
        assert!(!tokens.needs_refresh());

        tokens.set(expiring("t1", 3600), false).expect("set failed");
        assert!(tokens.needs_refresh());
    }

    #[tokio::test]
    async fn test_lazy_load_prefers_persistent_tier() {
        let persistent = Arc::new(MemoryTier::new());
        let session = Arc::new(MemoryTier::new());
        persistent
            .store("app-token", r#"{"access_token":"durable","token_type":"Bearer"}"#)
            .expect("store failed");
        session
            .store("app-token", r#"{"access_token":"ephemeral","token_type":"Bearer"}"#)
            .expect("store failed");

        let tokens = TokenStore::new(persistent, session, "app-token", 60);
        assert_eq!(tokens.current().expect("missing").access_token, "durable");
        assert_eq!(tokens.persisted(), Some(true));
    }

    #[tokio::test]
    async fn test_lazy_load_falls_back_to_session_tier() {
        let persistent = Arc::new(MemoryTier::new());
        let session = Arc::new(MemoryTier::new());
        session
            .store("app-token", r#"{"access_token":"ephemeral","token_type":"Bearer"}"#)
            .expect("store failed");

        let tokens = TokenStore::new(persistent, session, "app-token", 60);
        assert_eq!(tokens.current().expect("missing").access_token, "ephemeral");
        assert_eq!(tokens.persisted(), Some(false));
    }

    #[tokio::test]
    async fn test_corrupt_storage_degrades_to_no_credential() {
        let persistent = Arc::new(MemoryTier::new());
        let session = Arc::new(MemoryTier::new());
        persistent.store("app-token", "not json {{{").expect("store failed");

        let tokens = TokenStore::new(persistent, session, "app-token", 60);
        assert!(tokens.current().is_none());
        assert!(!tokens.valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_set_leaves_one_pending_refresh() {
        let (_p, _s, tokens) = store();
        let mut events = tokens.subscribe();

        for _ in 0..5 {
            tokens.set(expiring("t1", 3600), false).expect("set failed");
        }
        assert!(tokens.refresh_armed());

        tokio::time::advance(StdDuration::from_secs(4000)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let mut fired = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TokenEvent::RefreshRequested) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_disarms_pending_refresh() {
        let (_p, _s, tokens) = store();
        let mut events = tokens.subscribe();

        tokens.set(expiring("t1", 3600), false).expect("set failed");
        tokens.clear();
        assert!(!tokens.refresh_armed());

        tokio::time::advance(StdDuration::from_secs(4000)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, TokenEvent::RefreshRequested));
        }
    }

    #[tokio::test]
    async fn test_set_empty_token_clears() {
        let (persistent, _s, tokens) = store();
        tokens.set(Credential::bearer("t1"), true).expect("set failed");
        tokens.set(Credential::bearer(""), true).expect("set failed");
        assert!(tokens.current().is_none());
        assert!(persistent.load("app-token").expect("load failed").is_none());
    }
}
