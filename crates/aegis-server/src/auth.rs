//! Delegated authentication against the external identity provider.
//!
//! The service never issues credentials itself: signup, login, refresh and
//! token validation all proxy to the provider's REST surface. A small
//! per-IP throttle guards the login path, and password reset always
//! reports success so account existence is never enumerated.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{info, warn};

/// Login attempts allowed per source IP inside the throttle window.
const MAX_LOGIN_ATTEMPTS: usize = 10;
const LOGIN_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("identity provider not configured")]
    NotConfigured,
    #[error("invalid credentials")]
    Unauthorized,
    #[error("account not verified")]
    Unverified,
    #[error("too many authentication attempts")]
    RateLimited,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
}

pub struct IdentityClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    login_attempts: Mutex<HashMap<String, Vec<Instant>>>,
}

impl IdentityClient {
    /// `None` when no provider URL is configured; protected routes then
    /// reject with 401 and optional-auth routes skip validation.
    pub fn new(base_url: &str, api_key: &str) -> Option<Self> {
        if base_url.is_empty() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .ok()?,
            base: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            login_attempts: Mutex::new(HashMap::new()),
        })
    }

    async fn post(&self, path: &str, bearer: &str, body: Value) -> Result<Value, AuthError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        let value: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            Ok(value)
        } else if status.as_u16() == 400 || status.as_u16() == 401 {
            Err(AuthError::Unauthorized)
        } else {
            Err(AuthError::Unavailable(format!("{status}")))
        }
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<Value, AuthError> {
        let result = self
            .post(
                "/auth/v1/signup",
                &self.api_key,
                json!({"email": email, "password": password}),
            )
            .await;
        if result.is_ok() {
            info!(email, "signup delegated to identity provider");
        }
        result
    }

    /// Password-grant login, throttled per client IP.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client_ip: &str,
    ) -> Result<Value, AuthError> {
        self.check_rate_limit(client_ip)?;
        self.post(
            "/auth/v1/token?grant_type=password",
            &self.api_key,
            json!({"email": email, "password": password}),
        )
        .await
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.post("/auth/v1/logout", token, Value::Null).await?;
        Ok(())
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Value, AuthError> {
        self.post(
            "/auth/v1/token?grant_type=refresh_token",
            &self.api_key,
            json!({"refresh_token": refresh_token}),
        )
        .await
    }

    /// Always reports success to the caller: account existence is never
    /// enumerated through the reset path.
    pub async fn reset_password(&self, email: &str) {
        if let Err(e) = self
            .post(
                "/auth/v1/recover",
                &self.api_key,
                json!({"email": email}),
            )
            .await
        {
            warn!(error = %e, "password reset delegation failed (reported as success)");
        }
    }

    /// Validate a bearer token and return the caller's identity. A user
    /// without a confirmed email is rejected as unverified.
    pub async fn validate_token(&self, token: &str) -> Result<AuthContext, AuthError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Unauthorized);
        }
        let user: Value = response
            .json()
            .await
            .map_err(|_| AuthError::Unauthorized)?;

        if user
            .get("email_confirmed_at")
            .map_or(true, Value::is_null)
        {
            return Err(AuthError::Unverified);
        }

        Ok(AuthContext {
            user_id: user
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            email: user
                .get("email")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Best-effort admin-side session revocation for a user.
    pub async fn admin_revoke_sessions(&self, user: &str) -> Result<(), AuthError> {
        self.post(
            "/auth/v1/admin/logout",
            &self.api_key,
            json!({"user": user}),
        )
        .await?;
        Ok(())
    }

    fn check_rate_limit(&self, client_ip: &str) -> Result<(), AuthError> {
        let mut attempts = self.login_attempts.lock().unwrap();
        let now = Instant::now();
        let window = attempts.entry(client_ip.to_string()).or_default();
        window.retain(|t| now.duration_since(*t) < LOGIN_WINDOW);
        if window.len() >= MAX_LOGIN_ATTEMPTS {
            warn!(client_ip, "login throttled");
            return Err(AuthError::RateLimited);
        }
        window.push(now);
        Ok(())
    }
}
