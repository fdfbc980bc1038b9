//! src/retrieve/ky_http.rs
//!
//! KyHttp: resilient HTTP helper with retry semantics, single-body read,
//! exponential backoff with jitter and explicit Retry-After handling.
//! `fetch_raw` is the single-shot escape hatch for callers that run their own
//! retry policy (the report poller).
use crate::core::error::NgError;
use crate::loggers::Logger;
use chrono::{DateTime, Utc};
use reqwest::{header::HeaderMap, header::CONTENT_TYPE, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// KyOptions
///
/// Public options for KyHttp. Includes test hooks for deterministic backoff.
#[derive(Clone, Debug)]
pub struct KyOptions {
    /// Optional timeout for the underlying reqwest client.
    pub timeout: Option<Duration>,

    /// Number of retries (not total attempts). Total attempts = retry + 1.
    pub retry: usize,

    /// Status codes that are considered retryable.
    pub status_codes: HashSet<StatusCode>,

    /// Status codes that should be checked for Retry-After header.
    pub after_status_codes: HashSet<StatusCode>,

    /// Maximum allowed Retry-After duration (if set).
    pub max_retry_after: Option<Duration>,

    /// Delay before the first retry; doubled on each further retry.
    pub backoff_base: Duration,

    /// Maximum backoff limit for computed delays.
    pub backoff_limit: Option<Duration>,

    /// Upper bound of the random jitter, as a fraction of the computed delay.
    pub jitter: f64,

    /// Whether to retry on timeout errors.
    pub retry_on_timeout: bool,

    /// Allowed HTTP methods for requests.
    pub allowed_methods: HashSet<Method>,

    /// If true, backoff jitter is deterministic and small for tests.
    pub test_mode: bool,

    /// When true, disable jitter entirely.
    pub disable_jitter: bool,
}

impl Default for KyOptions {
    fn default() -> Self {
        // default status codes: 408 413 429 500 502 503 504
        let status_codes = [408u16, 413, 429, 500, 502, 503, 504]
            .iter()
            .filter_map(|&c| StatusCode::from_u16(c).ok())
            .collect();

        // afterStatusCodes: 413, 429, 503
        let after_status_codes = [413u16, 429, 503]
            .iter()
            .filter_map(|&c| StatusCode::from_u16(c).ok())
            .collect();

        let allowed_methods = [
            Method::GET,
            Method::HEAD,
            Method::OPTIONS,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ]
        .into_iter()
        .collect();

        Self {
            timeout: Some(Duration::from_secs(15)),
            retry: 2,
            status_codes,
            after_status_codes,
            max_retry_after: None,
            backoff_base: Duration::from_millis(300),
            backoff_limit: None,
            jitter: 0.1,
            retry_on_timeout: false,
            allowed_methods,
            test_mode: false,
            disable_jitter: false,
        }
    }
}

/// ApiResponse<T>
///
/// Standard response wrapper returned by KyHttp methods.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// Parsed JSON body when success.
    pub data: Option<T>,

    /// Raw error body text when non-success.
    pub error_body: Option<String>,

    /// HTTP status code.
    pub status: u16,

    /// Whether the response was successful (2xx).
    pub success: bool,

    /// Response headers.
    pub headers: HeaderMap,

    /// Number of attempts spent to obtain this response.
    pub attempts: usize,
}

impl<T> ApiResponse<T> {
    /// First 250 bytes of the error body, for log lines and error messages.
    pub fn error_snippet(&self) -> String {
        snippet(self.error_body.as_deref().unwrap_or("[No Body]"), 250)
    }
}

/// RawResponse
///
/// Unparsed response returned by `fetch_raw`.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Lower-cased `Content-Type` header, empty when absent.
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_json(&self) -> bool {
        self.content_type.contains("application/json")
    }

    pub fn body_snippet(&self, max: usize) -> String {
        snippet(&String::from_utf8_lossy(&self.body), max)
    }
}

/// Cuts `s` to at most `max` bytes without splitting a UTF-8 character.
pub fn snippet(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &s[..end])
}

/// KyHttp
///
/// Primary HTTP helper.
#[derive(Clone)]
pub struct KyHttp {
    client: Client,
    logger: Logger,
    opts: KyOptions,
}

impl KyHttp {
    pub fn new(logger: Logger) -> Self {
        Self::new_with_opts(logger, None)
    }

    pub fn new_with_opts(logger: Logger, opts: Option<KyOptions>) -> Self {
        let opts = opts.unwrap_or_default();
        let mut builder = Client::builder();
        if let Some(timeout) = opts.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|_| Client::new());

        Self { client, logger, opts }
    }

    pub fn options(&self) -> &KyOptions {
        &self.opts
    }

    /// Exponential delay for a 1-based attempt number, capped by `backoff_limit`.
    pub fn compute_delay(&self, attempt: usize) -> Duration {
        let pow = 2f64.powi((attempt as i32) - 1);
        let ms = self.opts.backoff_base.as_millis() as f64 * pow;
        let dur = Duration::from_millis(ms.round() as u64);

        match self.opts.backoff_limit {
            Some(limit) if dur > limit => limit,
            _ => dur,
        }
    }

    /// Compute exponential backoff with optional jitter. attempt starts at 1.
    fn compute_backoff_with_jitter(&self, attempt: usize, rng: &mut SmallRng) -> Duration {
        let base_ms = self.compute_delay(attempt).as_millis() as u64;

        let jitter_ms = if self.opts.disable_jitter || self.opts.jitter <= 0.0 {
            0
        } else {
            let jitter_max = ((base_ms as f64 * self.opts.jitter) as u64).max(1);
            if self.opts.test_mode {
                // small deterministic jitter in test mode
                rng.gen_range(0..=jitter_max.min(5))
            } else {
                rng.gen_range(0..=jitter_max)
            }
        };

        let mut candidate = base_ms.saturating_add(jitter_ms);

        if let Some(max_ra) = self.opts.max_retry_after {
            candidate = candidate.min(max_ra.as_millis() as u64);
        }
        if let Some(limit) = self.opts.backoff_limit {
            candidate = candidate.min(limit.as_millis() as u64);
        }

        Duration::from_millis(candidate)
    }

    /// Parse Retry-After header from headers. Supports numeric seconds and several date formats.
    pub fn parse_retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
        let raw = headers.get("retry-after")?.to_str().ok()?.trim().to_string();

        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Duration::from_secs(secs.max(1)));
        }

        let parsed = DateTime::parse_from_str(&raw, "%a, %d %b %Y %H:%M:%S GMT")
            .or_else(|_| DateTime::parse_from_rfc2822(&raw))
            .or_else(|_| DateTime::parse_from_rfc3339(&raw))
            .ok()?;

        let diff = parsed.with_timezone(&Utc).signed_duration_since(Utc::now());
        Some(Duration::from_secs(diff.num_seconds().max(1) as u64))
    }

    /// Retry-After honoured only for `after_status_codes`, capped by the configured limits.
    fn retry_after_for(&self, status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
        if !self.opts.after_status_codes.contains(&status) {
            return None;
        }
        let retry_after = Self::parse_retry_after_from_headers(headers)?;
        Some(if let Some(max) = self.opts.max_retry_after {
            retry_after.min(max)
        } else if let Some(limit) = self.opts.backoff_limit {
            retry_after.min(limit)
        } else {
            retry_after
        })
    }

    // Core request logic with retries.
    async fn request_with_retry<T>(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        attach: &(dyn Fn(RequestBuilder) -> RequestBuilder + Sync),
    ) -> Result<ApiResponse<T>, NgError>
    where
        T: DeserializeOwned,
    {
        if !self.opts.allowed_methods.contains(&method) {
            crate::error!(
                self.logger,
                "Method not allowed",
                "method" => method.as_str(),
                "url" => url
            );
            return Err(NgError::InternalError(format!(
                "Method {} not allowed",
                method.as_str()
            )));
        }

        crate::debug!(
            self.logger,
            "Request start",
            "method" => method.as_str(),
            "url" => url
        );

        // total attempts = retry + 1
        let max_attempts = self.opts.retry.saturating_add(1);

        let mut rng = if self.opts.test_mode { SmallRng::seed_from_u64(0xC0FFEE) } else { SmallRng::from_entropy() };

        let mut last_err: Option<NgError> = None;
        let mut last_status: Option<u16> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                crate::info!(self.logger, "Retry attempt", "url" => url, "attempt" => attempt);
            }

            let rb = attach(self.client.request(method.clone(), url).headers(headers.clone()));

            match rb.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let status_u16 = status.as_u16();
                    let resp_headers = resp.headers().clone();
                    // Read body once and reuse
                    let body_text = resp.text().await.unwrap_or_default();

                    if status.is_success() {
                        return match serde_json::from_str::<T>(&body_text) {
                            Ok(parsed) => Ok(ApiResponse {
                                data: Some(parsed),
                                error_body: None,
                                status: status_u16,
                                success: true,
                                headers: resp_headers,
                                attempts: attempt,
                            }),
                            Err(_) => Err(NgError::NonJsonResponse {
                                url: url.to_string(),
                                status: status_u16,
                                body_snippet: snippet(&body_text, 250),
                            }),
                        };
                    }

                    last_status = Some(status_u16);
                    last_err = Some(NgError::HttpError(format!("Status: {}", status_u16)));

                    let retryable = self.opts.status_codes.contains(&status);
                    if retryable && attempt < max_attempts {
                        let wait = match self.retry_after_for(status, &resp_headers) {
                            Some(ra) => {
                                crate::info!(
                                    self.logger,
                                    "Respecting Retry-After header",
                                    "url" => url,
                                    "retry_after_secs" => ra.as_secs()
                                );
                                ra
                            }
                            None => self.compute_backoff_with_jitter(attempt, &mut rng),
                        };
                        crate::warn!(
                            self.logger,
                            "Retryable status",
                            "url" => url,
                            "status" => status_u16,
                            "attempt" => attempt,
                            "wait_ms" => wait.as_millis() as u64
                        );
                        sleep(wait).await;
                        continue;
                    }

                    // Not retryable or exhausted attempts: return ApiResponse with error body
                    return Ok(ApiResponse {
                        data: None,
                        error_body: if body_text.is_empty() { None } else { Some(body_text) },
                        status: status_u16,
                        success: false,
                        headers: resp_headers,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    crate::error!(
                        self.logger,
                        "Network failure",
                        "url" => url,
                        "attempt" => attempt,
                        "error" => e.to_string()
                    );

                    if e.is_timeout() && !self.opts.retry_on_timeout {
                        return Err(NgError::HttpError(e.to_string()));
                    }

                    last_err = Some(NgError::HttpError(e.to_string()));

                    if attempt < max_attempts {
                        let backoff = self.compute_backoff_with_jitter(attempt, &mut rng);
                        sleep(backoff).await;
                        continue;
                    }
                }
            }
        }

        // Exhausted attempts: return enriched error
        let mut parts = Vec::new();
        if let Some(s) = last_status { parts.push(format!("status={}", s)); }
        parts.push(format!("attempts={}", max_attempts));
        if let Some(e) = last_err { parts.push(format!("last_err=\"{}\"", e.to_string().replace('"', "'"))); }
        Err(NgError::HttpError(parts.join(", ")))
    }

    /// Public GET convenience
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<ApiResponse<T>, NgError> {
        self.request_with_retry(Method::GET, url, headers, &|rb| rb).await
    }

    /// /// post
    ///
    /// Public POST request with JSON body and JSON response parsing.
    ///
    /// # Arguments
    ///
    /// * `url` - Request URL.
    /// * `headers` - Request headers. A `Content-Type` set here overrides the JSON default.
    /// * `body` - Body to serialize as JSON.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        mut headers: HeaderMap,
        body: &B,
    ) -> Result<ApiResponse<T>, NgError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| NgError::InternalError(format!("JSON encode: {}", e)))?;
        let content_type = headers
            .remove(CONTENT_TYPE)
            .unwrap_or_else(|| reqwest::header::HeaderValue::from_static("application/json"));

        self.request_with_retry(Method::POST, url, headers, &|rb| {
            rb.header(CONTENT_TYPE, content_type.clone()).body(payload.clone())
        })
        .await
    }

    /// /// post_form
    ///
    /// Public POST request with an `application/x-www-form-urlencoded` body.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: HeaderMap,
        form: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, NgError> {
        self.request_with_retry(Method::POST, url, headers, &|rb| rb.form(form)).await
    }

    /// /// fetch_raw
    ///
    /// Single GET attempt without retries or body parsing. Network failures
    /// surface as `NgError::HttpError`; every HTTP status is returned as data.
    pub async fn fetch_raw(
        &self,
        url: &str,
        headers: HeaderMap,
        query: &[(&str, String)],
    ) -> Result<RawResponse, NgError> {
        let resp = self
            .client
            .get(url)
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|e| NgError::HttpError(e.to_string()))?;

        let status = resp.status().as_u16();
        let resp_headers = resp.headers().clone();
        let content_type = resp_headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = resp
            .bytes()
            .await
            .map_err(|e| NgError::HttpError(e.to_string()))?
            .to_vec();

        Ok(RawResponse {
            status,
            headers: resp_headers,
            content_type,
            body,
        })
    }
}
