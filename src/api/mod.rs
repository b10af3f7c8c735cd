//! Request pipeline and API client.
//!
//! This module provides:
//! - `OutboundRequest` and the ordered `RequestStage` chain
//! - `ApiClient`: pipeline execution, transport seam, failure classification
//! - `ApiError`: the typed status-code taxonomy

pub mod client;
pub mod error;
pub mod hooks;
pub mod pipeline;

pub use client::{ApiClient, HttpTransport, ReqwestTransport, TransportResponse};
pub use error::ApiError;
pub use hooks::{Navigator, Notifier, SilentNavigator, SilentNotifier};
pub use pipeline::{OutboundRequest, RequestStage};
