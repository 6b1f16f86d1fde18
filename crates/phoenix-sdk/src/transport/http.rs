//! Control-plane request executor: header construction, per-request deadline,
//! error classification, and the retry loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::PhoenixConfig;
use crate::error::PhoenixError;
use crate::transport::backoff::{next_backoff, sleep_cancellable, RetryOverride, RetryPolicy};

const TRANSIENT_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];
const AUTH_MODE_HEADER: &str = "x-phoenix-auth-mode";
const IDEMPOTENCY_HEADER: &str = "idempotency_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Per-call options layered on top of the client configuration.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub correlation_headers: HashMap<String, String>,
    pub idempotency_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retry: RetryOverride,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Layer `overrides` on top of `base`: headers and correlation headers
    /// merge with the override winning on conflict, scalar fields replace
    /// when set.
    pub fn merged(base: Option<&RequestOptions>, overrides: Option<RequestOptions>) -> Option<Self> {
        match (base, overrides) {
            (None, overrides) => overrides,
            (Some(base), None) => Some(base.clone()),
            (Some(base), Some(overrides)) => {
                let mut merged = base.clone();
                merged.headers.extend(overrides.headers);
                merged.correlation_headers.extend(overrides.correlation_headers);
                if overrides.idempotency_key.is_some() {
                    merged.idempotency_key = overrides.idempotency_key;
                }
                if overrides.timeout_ms.is_some() {
                    merged.timeout_ms = overrides.timeout_ms;
                }
                merged.retry = merged.retry.layered(&overrides.retry);
                if overrides.cancel.is_some() {
                    merged.cancel = overrides.cancel;
                }
                Some(merged)
            }
        }
    }
}

/// One logical control-plane request. Immutable per call.
#[derive(Debug, Clone)]
pub struct RequestArgs {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub options: RequestOptions,
}

impl RequestArgs {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: Option<RequestOptions>) -> Self {
        if let Some(options) = options {
            self.options = options;
        }
        self
    }
}

/// Wire-level request handed to the pluggable requester.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Wire-level response. Headers keep their received names; lookups are
/// case-insensitive.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Transport-level failure before any HTTP status was received.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub timed_out: bool,
    pub message: String,
}

/// Seam for the underlying HTTP implementation, so tests can inject doubles
/// and alternative runtimes can swap the stack.
#[async_trait]
pub trait HttpRequester: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

/// Default requester backed by `reqwest`. The executor owns the deadline, so
/// no client-level timeout is configured here.
pub struct ReqwestRequester {
    client: reqwest::Client,
}

impl ReqwestRequester {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestRequester {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpRequester for ReqwestRequester {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| TransportFailure {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.text().await.map_err(|err| TransportFailure {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        })?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Retrying executor for one logical request against the control plane.
pub struct PhoenixTransport {
    config: PhoenixConfig,
    requester: Arc<dyn HttpRequester>,
}

impl PhoenixTransport {
    pub fn new(config: PhoenixConfig) -> Self {
        Self::with_requester(config, Arc::new(ReqwestRequester::new()))
    }

    pub fn with_requester(config: PhoenixConfig, requester: Arc<dyn HttpRequester>) -> Self {
        Self { config, requester }
    }

    pub fn config(&self) -> &PhoenixConfig {
        &self.config
    }

    /// Execute the request and decode the payload into `T`. A decode failure
    /// is a non-retriable validation error carrying the diagnostic.
    pub async fn request<T: DeserializeOwned>(&self, args: RequestArgs) -> Result<T, PhoenixError> {
        let method = args.method;
        let path = args.path.clone();
        let payload = self.request_value(args).await?;
        serde_json::from_value(payload).map_err(|err| {
            PhoenixError::validation(format!(
                "response validation failed for {} {}",
                method.as_str(),
                path
            ))
            .with_details(json!({ "error": err.to_string() }))
        })
    }

    /// Execute the request and return the raw parsed payload.
    pub async fn request_value(&self, args: RequestArgs) -> Result<Value, PhoenixError> {
        let retry = self.resolve_retry(&args.options);
        let url = join_url(&self.config.base_url, &args.path);

        if let Some(token) = &args.options.cancel {
            if token.is_cancelled() {
                return Err(PhoenixError::timeout(
                    format!(
                        "request cancelled before dispatch for {} {}",
                        args.method.as_str(),
                        args.path
                    ),
                    true,
                ));
            }
        }

        for attempt in 0..=retry.max_retries {
            match self.attempt(&url, &args, retry.timeout_ms).await? {
                Ok(response) => {
                    if !(200..300).contains(&response.status) {
                        let body = parse_body(&response.body);
                        let correlation_id = self.extract_correlation_id(&response.headers);
                        let retriable = TRANSIENT_STATUS_CODES.contains(&response.status);

                        if retriable && attempt < retry.max_retries {
                            tracing::debug!(
                                status = response.status,
                                attempt,
                                path = %args.path,
                                "transient status, backing off before retry"
                            );
                            sleep_cancellable(
                                next_backoff(attempt, &retry),
                                args.options.cancel.as_ref(),
                            )
                            .await?;
                            continue;
                        }

                        let mut error = PhoenixError::http(
                            format!(
                                "HTTP {} for {} {}",
                                response.status,
                                args.method.as_str(),
                                args.path
                            ),
                            response.status,
                            retriable,
                        )
                        .with_details(body);
                        if let Some(correlation_id) = correlation_id {
                            error = error.with_correlation_id(correlation_id);
                        }
                        return Err(error);
                    }

                    return Ok(parse_body(&response.body));
                }
                Err(failure) => {
                    let retriable = failure.timed_out;

                    if retriable && attempt < retry.max_retries {
                        tracing::debug!(
                            attempt,
                            path = %args.path,
                            "request deadline elapsed, backing off before retry"
                        );
                        sleep_cancellable(
                            next_backoff(attempt, &retry),
                            args.options.cancel.as_ref(),
                        )
                        .await?;
                        continue;
                    }

                    return Err(if failure.timed_out {
                        PhoenixError::timeout(
                            format!(
                                "request timeout for {} {}",
                                args.method.as_str(),
                                args.path
                            ),
                            true,
                        )
                        .with_details(json!({ "error": failure.message }))
                    } else {
                        PhoenixError::network(
                            format!(
                                "network error for {} {}",
                                args.method.as_str(),
                                args.path
                            ),
                            false,
                        )
                        .with_details(json!({ "error": failure.message }))
                    });
                }
            }
        }

        Err(PhoenixError::network(
            format!(
                "exhausted retries for {} {}",
                args.method.as_str(),
                args.path
            ),
            false,
        ))
    }

    /// One attempt under the effective deadline. The outer `Result` carries
    /// hard failures (token resolution); the inner distinguishes received
    /// responses from transport-level failures.
    async fn attempt(
        &self,
        url: &str,
        args: &RequestArgs,
        timeout_ms: u64,
    ) -> Result<Result<HttpResponse, TransportFailure>, PhoenixError> {
        let headers = self.build_headers(args).await?;
        let request = HttpRequest {
            method: args.method,
            url: url.to_string(),
            headers,
            body: args
                .body
                .as_ref()
                .map(|body| body.to_string()),
        };

        let deadline = Duration::from_millis(timeout_ms);
        let send = self.requester.send(request);

        let outcome = match &args.options.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(TransportFailure {
                        timed_out: true,
                        message: "request cancelled".to_string(),
                    }),
                    result = tokio::time::timeout(deadline, send) => match result {
                        Ok(result) => result,
                        Err(_) => Err(TransportFailure {
                            timed_out: true,
                            message: "deadline elapsed".to_string(),
                        }),
                    },
                }
            }
            None => match tokio::time::timeout(deadline, send).await {
                Ok(result) => result,
                Err(_) => Err(TransportFailure {
                    timed_out: true,
                    message: "deadline elapsed".to_string(),
                }),
            },
        };

        Ok(outcome)
    }

    async fn build_headers(&self, args: &RequestArgs) -> Result<Vec<(String, String)>, PhoenixError> {
        // Lowercased keys make later entries overwrite earlier ones
        // regardless of the caller's header casing.
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut set = |name: &str, value: String| {
            let name = name.to_ascii_lowercase();
            if let Some(entry) = headers.iter_mut().find(|(existing, _)| *existing == name) {
                entry.1 = value;
            } else {
                headers.push((name, value));
            }
        };

        set("content-type", "application/json".to_string());
        for (name, value) in &self.config.default_headers {
            set(name, value.clone());
        }
        for (name, value) in &args.options.headers {
            set(name, value.clone());
        }

        if let Some(token) = &self.config.token {
            let token = token.resolve().await?;
            set("authorization", format!("Bearer {token}"));
        }

        if let Some(mode) = &self.config.auth_mode {
            set(AUTH_MODE_HEADER, mode.clone());
        }

        if let Some(key) = &args.options.idempotency_key {
            set(IDEMPOTENCY_HEADER, key.clone());
        }

        for key in &self.config.correlation_header_keys {
            if let Some(value) = args.options.correlation_headers.get(key) {
                set(key, value.clone());
            }
        }

        Ok(headers)
    }

    fn extract_correlation_id(&self, headers: &[(String, String)]) -> Option<String> {
        for key in &self.config.correlation_header_keys {
            if let Some((_, value)) = headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
            {
                if !value.is_empty() {
                    return Some(value.clone());
                }
            }
        }
        None
    }

    fn resolve_retry(&self, options: &RequestOptions) -> RetryPolicy {
        let mut policy = self.config.retry.merged(&options.retry);
        if let Some(timeout_ms) = options.timeout_ms {
            policy.timeout_ms = timeout_ms;
        }
        policy
    }
}

/// Tolerant body parse: empty body becomes an empty object, non-JSON text is
/// wrapped rather than rejected.
fn parse_body(text: &str) -> Value {
    if text.is_empty() {
        return json!({});
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
