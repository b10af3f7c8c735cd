//! Wire contract with the authentication service.
//!
//! Login, refresh, and logout are issued through the request pipeline with
//! relative paths, so they take the same URL-rewrite and settings stages as
//! every resource call.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, OutboundRequest};
use crate::config::ServiceConfig;

use super::token::Credential;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response: a token, and sometimes the signed-in user record.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: Credential,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

/// The three auth endpoints the session coordinator drives.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse>;
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<Credential>;
    async fn logout(&self) -> Result<()>;
}

pub struct AuthApi {
    api: Arc<ApiClient>,
    auth_prefix: String,
}

impl AuthApi {
    pub fn new(api: Arc<ApiClient>, config: &ServiceConfig) -> Self {
        Self {
            api,
            auth_prefix: config.auth_prefix.clone(),
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.auth_prefix, name)
    }
}

#[async_trait]
impl AuthTransport for AuthApi {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let body = serde_json::to_value(request)?;
        let response = self
            .api
            .execute(OutboundRequest::post(self.endpoint("login"), body))
            .await?;
        response
            .json::<LoginResponse>()
            .context("Failed to parse login response")
    }

    async fn refresh(&self, refresh_token: Option<&str>) -> Result<Credential> {
        // The field is omitted entirely when no renewal credential exists.
        let body = match refresh_token {
            Some(rt) => serde_json::json!({ "refresh_token": rt }),
            None => serde_json::json!({}),
        };
        let response = self
            .api
            .execute(OutboundRequest::post(self.endpoint("refresh"), body))
            .await?;
        response
            .json::<Credential>()
            .context("Failed to parse refresh response")
    }

    async fn logout(&self) -> Result<()> {
        // Sent silently: the backend rejecting a logout (commonly with 401
        // for an already-invalid token) must not re-enter the unauthorized
        // cascade that triggered the logout in the first place.
        self.api
            .execute(
                OutboundRequest::post(self.endpoint("logout"), serde_json::json!({})).silent(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_without_user() {
        let response: LoginResponse =
            serde_json::from_str(r#"{"token":{"access_token":"t1","token_type":"Bearer"}}"#)
                .expect("Failed to parse login response");
        assert_eq!(response.token.access_token, "t1");
        assert!(response.user.is_none());
    }

    #[test]
    fn test_login_response_with_user() {
        let response: LoginResponse = serde_json::from_str(
            r#"{"token":{"access_token":"t1","expires_in":3600},"user":{"id":7,"name":"Ada"}}"#,
        )
        .expect("Failed to parse login response");
        assert_eq!(response.token.expires_in, Some(3600));
        let user = response.user.expect("missing user");
        assert_eq!(user["id"], 7);
    }
}
