//! finboard-core - session and credential lifecycle core for the finboard
//! financial dashboard.
//!
//! The crate owns the authentication token, decides when it must be silently
//! renewed, propagates identity changes to the rest of the application, and
//! mediates every outgoing network call through an ordered pipeline that
//! rewrites URLs, injects credentials, and classifies failures.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use finboard_core::api::{ApiClient, ReqwestTransport, SilentNavigator, SilentNotifier};
//! use finboard_core::auth::{AuthApi, SessionCoordinator, TokenStore};
//! use finboard_core::config::ServiceConfig;
//! use finboard_core::storage::{FileTier, MemoryTier, StorageTier};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ServiceConfig::load()?;
//! let persistent: Arc<dyn StorageTier> = Arc::new(FileTier::new(config.storage_dir()?)?);
//! let session_tier: Arc<dyn StorageTier> = Arc::new(MemoryTier::new());
//!
//! let tokens = Arc::new(TokenStore::new(
//!     Arc::clone(&persistent),
//!     session_tier,
//!     &config.token_key,
//!     config.refresh_lead_secs,
//! ));
//! let api = Arc::new(ApiClient::new(
//!     &config,
//!     Arc::clone(&tokens),
//!     Arc::new(ReqwestTransport::new()?),
//!     Arc::new(SilentNotifier),
//!     Arc::new(SilentNavigator),
//! ));
//! let auth = Arc::new(AuthApi::new(Arc::clone(&api), &config));
//! let sessions = SessionCoordinator::new(&config, tokens, auth, persistent);
//! sessions.attach_unauthorized_hook(&api);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

pub use api::{ApiClient, ApiError, OutboundRequest};
pub use auth::{Credential, Identity, SessionCoordinator, TokenStore};
pub use config::ServiceConfig;
