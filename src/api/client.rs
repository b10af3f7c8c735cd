//! API client: runs every outgoing request through the stage pipeline, sends
//! it over a pluggable transport, and classifies failure responses.
//!
//! The classifier is the outermost layer so it observes the final transport
//! outcome: 401 notifies and navigates to the sign-in view, 403/404/500
//! navigate to a status-coded error view with history-skip, anything else
//! non-2xx raises a generic notification. The typed error always propagates
//! to the caller as well.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::token::TokenStore;
use crate::config::ServiceConfig;

use super::hooks::{Navigator, Notifier};
use super::pipeline::{
    BearerStage, OutboundRequest, PassthroughStage, RequestStage, RewriteStage, SettingsStage,
};
use super::ApiError;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fallback notification text when a 401 body carries no message.
const UNAUTHORIZED_FALLBACK: &str = "Your session has expired. Please sign in again.";

/// Raw response as seen by the classifier.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

impl TransportResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// The wire boundary. Production uses `ReqwestTransport`; tests substitute a
/// recording mock.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, ApiError>;
}

/// Transport over a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, ApiError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}

type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    stages: Vec<Box<dyn RequestStage>>,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    on_unauthorized: RwLock<Option<UnauthorizedHook>>,
}

impl ApiClient {
    pub fn new(
        config: &ServiceConfig,
        tokens: Arc<TokenStore>,
        transport: Arc<dyn HttpTransport>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        // Stage order is fixed: the URL must point at the right backend
        // before credentials are attached.
        let stages: Vec<Box<dyn RequestStage>> = vec![
            Box::new(PassthroughStage),
            Box::new(RewriteStage::new(config)),
            Box::new(SettingsStage::new(config)),
            Box::new(BearerStage::new(tokens)),
        ];
        Self {
            transport,
            stages,
            notifier,
            navigator,
            login_route: config.login_route(),
            on_unauthorized: RwLock::new(None),
        }
    }

    /// Register a callback invoked on every 401 response, after the
    /// notification and navigation side effects.
    pub fn on_unauthorized(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut slot = self
            .on_unauthorized
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(Arc::new(hook));
    }

    /// Run a request through the pipeline and classify the outcome. Silent
    /// requests skip classification side effects but still fail typed.
    pub async fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, ApiError> {
        let prepared = self
            .stages
            .iter()
            .fold(request, |req, stage| stage.apply(req));
        debug!(method = %prepared.method, url = %prepared.url, "sending request");

        let silent = prepared.silent;
        let response = self.transport.send(prepared).await?;
        if response.status.is_success() {
            return Ok(response);
        }
        if !silent {
            self.classify_failure(&response);
        }
        Err(ApiError::from_status(response.status, &response.body))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(OutboundRequest::new(Method::GET, path)).await?;
        response.json()
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self.execute(OutboundRequest::post(path, body)).await?;
        response.json()
    }

    fn classify_failure(&self, response: &TransportResponse) {
        let status = response.status;
        warn!(status = %status, "request failed");
        match status.as_u16() {
            401 => {
                let message = server_message(&response.body)
                    .unwrap_or_else(|| UNAUTHORIZED_FALLBACK.to_string());
                self.notifier.notify(&message);
                self.navigator.navigate(&self.login_route, false);
                let hook = self
                    .on_unauthorized
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone();
                if let Some(hook) = hook {
                    hook();
                }
            }
            403 | 404 | 500 => {
                // Dedicated status views replace the current view without
                // touching browser history.
                self.navigator.navigate(&format!("/{}", status.as_u16()), true);
            }
            code => {
                let message = server_message(&response.body)
                    .unwrap_or_else(|| format!("Request failed with status {}", code));
                self.notifier.notify(&message);
            }
        }
    }
}

/// Extract the `message` field from a JSON error body, if any.
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::Credential;
    use crate::storage::{MemoryTier, StorageTier};
    use reqwest::header::{ACCEPT_LANGUAGE, AUTHORIZATION};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transport that records the final request and replies with a canned
    /// status/body.
    struct MockTransport {
        status: StatusCode,
        body: String,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    impl MockTransport {
        fn new(status: StatusCode, body: &str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last_request(&self) -> OutboundRequest {
            self.seen
                .lock()
                .expect("mock poisoned")
                .last()
                .expect("no request seen")
                .clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, ApiError> {
            self.seen.lock().expect("mock poisoned").push(request);
            Ok(TransportResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().expect("mock poisoned").push(message.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        visits: Mutex<Vec<(String, bool)>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, path: &str, skip_history: bool) {
            self.visits
                .lock()
                .expect("mock poisoned")
                .push((path.to_string(), skip_history));
        }
    }

    struct Fixture {
        client: ApiClient,
        transport: Arc<MockTransport>,
        notifier: Arc<RecordingNotifier>,
        navigator: Arc<RecordingNavigator>,
        tokens: Arc<TokenStore>,
    }

    fn fixture(status: StatusCode, body: &str) -> Fixture {
        let config = ServiceConfig {
            auth_base_url: "https://auth.example.com".to_string(),
            api_base_url: "https://api.example.com".to_string(),
            ..ServiceConfig::default()
        };
        let tokens = Arc::new(TokenStore::new(
            Arc::new(MemoryTier::new()) as Arc<dyn StorageTier>,
            Arc::new(MemoryTier::new()) as Arc<dyn StorageTier>,
            "app-token",
            60,
        ));
        let transport = MockTransport::new(status, body);
        let notifier = Arc::new(RecordingNotifier::default());
        let navigator = Arc::new(RecordingNavigator::default());
        let client = ApiClient::new(
            &config,
            Arc::clone(&tokens),
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&navigator) as Arc<dyn Navigator>,
        );
        Fixture { client, transport, notifier, navigator, tokens }
    }

    #[tokio::test]
    async fn test_pipeline_rewrites_and_injects_bearer() {
        let f = fixture(StatusCode::OK, "{}");
        f.tokens.set(Credential::bearer("t1"), false).expect("set failed");

        f.client
            .execute(OutboundRequest::get("/auth/profile"))
            .await
            .expect("request failed");

        let seen = f.transport.last_request();
        assert_eq!(seen.url, "https://auth.example.com/auth/profile");
        assert_eq!(
            seen.headers.get(AUTHORIZATION).map(|v| v.to_str().unwrap_or("")),
            Some("Bearer t1")
        );
        assert!(seen.headers.get(ACCEPT_LANGUAGE).is_some());
    }

    #[tokio::test]
    async fn test_relative_asset_path_passes_untouched() {
        let f = fixture(StatusCode::OK, "{}");
        f.client
            .execute(OutboundRequest::get("/assets/i18n/en.json"))
            .await
            .expect("request failed");
        assert_eq!(f.transport.last_request().url, "/assets/i18n/en.json");
    }

    #[tokio::test]
    async fn test_unauthorized_notifies_and_navigates_once() {
        let f = fixture(StatusCode::UNAUTHORIZED, r#"{"message":"Invalid token"}"#);
        let hits = Arc::new(AtomicUsize::new(0));
        let hook_hits = Arc::clone(&hits);
        f.client.on_unauthorized(move || {
            hook_hits.fetch_add(1, Ordering::SeqCst);
        });

        let err = f
            .client
            .execute(OutboundRequest::get("/api/accounts"))
            .await
            .expect_err("expected failure");
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let messages = f.notifier.messages.lock().expect("mock poisoned");
        assert_eq!(messages.as_slice(), ["Invalid token"]);
        let visits = f.navigator.visits.lock().expect("mock poisoned");
        assert_eq!(visits.as_slice(), [("/auth/login".to_string(), false)]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_silent_request_skips_failure_side_effects() {
        let f = fixture(StatusCode::UNAUTHORIZED, r#"{"message":"Invalid token"}"#);
        let hits = Arc::new(AtomicUsize::new(0));
        let hook_hits = Arc::clone(&hits);
        f.client.on_unauthorized(move || {
            hook_hits.fetch_add(1, Ordering::SeqCst);
        });

        let err = f
            .client
            .execute(OutboundRequest::get("/auth/logout").silent())
            .await
            .expect_err("expected failure");
        assert!(matches!(err, ApiError::Unauthorized(_)));

        assert!(f.notifier.messages.lock().expect("mock poisoned").is_empty());
        assert!(f.navigator.visits.lock().expect("mock poisoned").is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_found_navigates_with_history_skip() {
        let f = fixture(StatusCode::NOT_FOUND, "");
        let err = f
            .client
            .execute(OutboundRequest::get("/api/accounts/9"))
            .await
            .expect_err("expected failure");
        assert!(matches!(err, ApiError::NotFound(_)));

        assert!(f.notifier.messages.lock().expect("mock poisoned").is_empty());
        let visits = f.navigator.visits.lock().expect("mock poisoned");
        assert_eq!(visits.as_slice(), [("/404".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_server_error_navigates_to_status_view() {
        let f = fixture(StatusCode::INTERNAL_SERVER_ERROR, "");
        let _ = f.client.execute(OutboundRequest::get("/api/accounts")).await;
        let visits = f.navigator.visits.lock().expect("mock poisoned");
        assert_eq!(visits.as_slice(), [("/500".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_other_failure_notifies_only() {
        let f = fixture(StatusCode::IM_A_TEAPOT, "");
        let err = f
            .client
            .execute(OutboundRequest::get("/api/accounts"))
            .await
            .expect_err("expected failure");
        assert!(matches!(err, ApiError::Unexpected { status: 418, .. }));

        assert_eq!(
            f.notifier.messages.lock().expect("mock poisoned").as_slice(),
            ["Request failed with status 418"]
        );
        assert!(f.navigator.visits.lock().expect("mock poisoned").is_empty());
    }
}
