//! Session and credential lifecycle.
//!
//! This module provides:
//! - `TokenStore`: credential persistence, expiry, change notifications
//! - `RefreshTimer`: the embedded cancellable refresh scheduler
//! - `SessionCoordinator`: identity derivation and login/refresh/logout
//! - `AuthTransport`: the login/refresh/logout wire contract
//!
//! Credentials are single-writer (the token store), identity is
//! single-writer (the coordinator); everything else only reads.

pub mod refresh;
pub mod session;
pub mod token;
pub mod transport;

pub use refresh::RefreshTimer;
pub use session::{Identity, SessionCoordinator};
pub use token::{Credential, TokenEvent, TokenStore};
pub use transport::{AuthApi, AuthTransport, LoginRequest, LoginResponse};
