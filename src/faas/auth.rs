//! # Credential / Token Manager
//!
//! Client-credentials grant against the provider's OAuth endpoint. Tokens are
//! never cached: the polling loop can outlive a token, so every caller asks
//! for a fresh one right before the request that will carry it.

use std::fmt;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::configs::FaasConfig;
use crate::core::error::NgError;
use crate::faas::report::ReportKind;
use crate::loggers::Logger;
use crate::retrieve::ky_http::{KyHttp, KyOptions};
use crate::{debug, error};

/// Opaque bearer token, valid for an unknown and possibly already elapsed lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    /// Header map carrying the token under the provider's custom header name.
    pub fn headers(&self, header_name: &str, accept: &'static str) -> Result<HeaderMap, NgError> {
        let name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| NgError::ConfigError(format!("invalid token header '{}': {}", header_name, e)))?;
        let value = HeaderValue::from_str(&self.0)
            .map_err(|_| NgError::InternalError("token contains characters not allowed in a header".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        Ok(headers)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(***{} chars)", self.0.len())
    }
}

pub struct TokenManager {
    http: KyHttp,
    logger: Logger,
    url: String,
    client_id: String,
    client_secret: String,
    grant_type: String,
    scope: String,
}

impl TokenManager {
    /// Builds the manager for `kind`'s scope. The configuration must have passed `validate`.
    pub fn new(config: &FaasConfig, kind: ReportKind, logger: Logger) -> Result<Self, NgError> {
        let auth = &config.auth;
        let need = |value: Option<&str>, key: &str| {
            value
                .map(str::to_string)
                .ok_or_else(|| NgError::ConfigError(format!("missing keys: {}", key)))
        };

        let opts = KyOptions {
            timeout: Some(Duration::from_secs(auth.timeout_secs)),
            retry: auth.max_attempts.saturating_sub(1) as usize,
            backoff_base: Duration::from_millis(auth.backoff_base_ms),
            jitter: auth.jitter,
            retry_on_timeout: true,
            ..KyOptions::default()
        };

        Ok(Self {
            http: KyHttp::new_with_opts(logger.clone(), Some(opts)),
            logger,
            url: need(auth.url.as_deref(), "auth.url")?,
            client_id: need(auth.client_id.as_deref(), "auth.client_id")?,
            client_secret: need(auth.client_secret.as_deref(), "auth.client_secret")?,
            grant_type: auth.grant_type.clone(),
            scope: need(auth.scopes.for_kind(kind), "auth.scopes")?,
        })
    }

    /// Performs a full round trip to the token endpoint.
    ///
    /// # Errors
    /// [`NgError::AuthError`] when the endpoint keeps failing past the attempt
    /// ceiling, answers non-2xx, or omits `access_token`.
    pub async fn acquire(&self) -> Result<Token, NgError> {
        let form = [
            ("grant_type", self.grant_type.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let resp = match self.http.post_form::<Value>(&self.url, headers, &form).await {
            Ok(resp) => resp,
            Err(NgError::NonJsonResponse { status, body_snippet, .. }) => {
                return Err(self.fail(status, format!("non-JSON body: {}", body_snippet)));
            }
            Err(e) => return Err(self.fail(0, e.to_string())),
        };

        if !resp.success {
            return Err(self.fail(resp.status, resp.error_snippet()));
        }

        let token = resp
            .data
            .as_ref()
            .and_then(|body| body.get("access_token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(Token::new);

        match token {
            Some(token) => {
                debug!(self.logger, "Token acquired", "attempts" => resp.attempts);
                Ok(token)
            }
            None => {
                let body = resp.data.map(|d| d.to_string()).unwrap_or_default();
                Err(self.fail(resp.status, format!("access_token missing from response: {}", body)))
            }
        }
    }

    fn fail(&self, status: u16, details: String) -> NgError {
        error!(
            self.logger,
            "Token request failed",
            "url" => &self.url,
            "status" => status,
            "details" => &details
        );
        NgError::AuthError {
            endpoint: self.url.clone(),
            status,
            details,
        }
    }
}
