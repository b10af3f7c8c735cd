//! Ordered request-transform stages.
//!
//! Every outgoing request passes through a fixed stage sequence before it
//! reaches the transport: a no-op extension point, URL rewriting by path
//! prefix, locale headers, then bearer injection. Order matters: a bearer
//! header is meaningless until the URL points at the right backend, so the
//! rewrite stage always runs first.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION};
use reqwest::Method;

use crate::auth::token::TokenStore;
use crate::config::ServiceConfig;

/// An outgoing request before it reaches the transport.
///
/// `url` may be a relative path (`/api/accounts`) or an absolute URL;
/// relative paths are resolved by the rewrite stage.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// When set, failure classification skips its notification and
    /// navigation side effects; the typed error still propagates.
    pub silent: bool,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            silent: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, url).with_json(body)
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Suppress failure-classifier side effects for this request.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// A URL with no scheme is relative and eligible for rewriting.
    pub fn is_relative(&self) -> bool {
        !self.url.contains("://")
    }
}

/// A single request-transform stage. Stages either pass the request through
/// unmodified or return a modified copy; they never perform I/O.
pub trait RequestStage: Send + Sync {
    fn apply(&self, request: OutboundRequest) -> OutboundRequest;
}

/// No-op baseline stage, kept as the pipeline's extension point.
pub struct PassthroughStage;

impl RequestStage for PassthroughStage {
    fn apply(&self, request: OutboundRequest) -> OutboundRequest {
        request
    }
}

/// Rewrites relative paths onto the configured backend base URLs by prefix
/// match. Paths outside both prefixes (static assets, localization files)
/// and absolute URLs pass unmodified.
pub struct RewriteStage {
    auth_prefix: String,
    api_prefix: String,
    auth_base_url: String,
    api_base_url: String,
}

impl RewriteStage {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            auth_prefix: config.auth_prefix.clone(),
            api_prefix: config.api_prefix.clone(),
            auth_base_url: config.auth_base_url.clone(),
            api_base_url: config.api_base_url.clone(),
        }
    }
}

impl RequestStage for RewriteStage {
    fn apply(&self, mut request: OutboundRequest) -> OutboundRequest {
        if !request.is_relative() {
            return request;
        }
        if request.url.starts_with(&self.auth_prefix) {
            request.url = format!("{}{}", self.auth_base_url, request.url);
        } else if request.url.starts_with(&self.api_prefix) {
            request.url = format!("{}{}", self.api_base_url, request.url);
        }
        request
    }
}

/// Attaches locale/preference headers.
pub struct SettingsStage {
    accept_language: HeaderValue,
}

impl SettingsStage {
    pub fn new(config: &ServiceConfig) -> Self {
        let accept_language = HeaderValue::from_str(&config.accept_language)
            .unwrap_or_else(|_| HeaderValue::from_static("en-US"));
        Self { accept_language }
    }
}

impl RequestStage for SettingsStage {
    fn apply(&self, mut request: OutboundRequest) -> OutboundRequest {
        request
            .headers
            .insert(ACCEPT_LANGUAGE, self.accept_language.clone());
        request
    }
}

/// Attaches the token store's bearer header when a valid credential exists.
pub struct BearerStage {
    tokens: Arc<TokenStore>,
}

impl BearerStage {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }
}

impl RequestStage for BearerStage {
    fn apply(&self, mut request: OutboundRequest) -> OutboundRequest {
        let value = self.tokens.bearer_header_value();
        if !value.is_empty() {
            if let Ok(header) = HeaderValue::from_str(&value) {
                request.headers.insert(AUTHORIZATION, header);
            }
        }
        request
    }
}
