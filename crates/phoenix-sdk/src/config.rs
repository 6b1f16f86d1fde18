//! Caller-facing configuration for the control-plane transport.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PhoenixError;
use crate::transport::backoff::RetryPolicy;

/// Correlation headers copied from caller-supplied correlation headers and
/// mirrored back out of responses, unless the client overrides the list.
pub const DEFAULT_CORRELATION_HEADERS: &[&str] =
    &["x-correlation-id", "x-request-id", "traceparent"];

/// Asynchronous bearer-token source. Resolved on every attempt, so a
/// refreshed token is naturally picked up on retry.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, PhoenixError>;
}

/// Static token or pluggable async provider.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    Provider(Arc<dyn TokenProvider>),
}

impl TokenSource {
    pub(crate) async fn resolve(&self) -> Result<String, PhoenixError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Provider(provider) => provider.access_token().await,
        }
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("TokenSource::Static(..)"),
            TokenSource::Provider(_) => f.write_str("TokenSource::Provider(..)"),
        }
    }
}

/// Client-level configuration. Everything beyond `base_url` is optional with
/// the stated defaults.
#[derive(Debug, Clone)]
pub struct PhoenixConfig {
    pub base_url: String,
    pub token: Option<TokenSource>,
    pub auth_mode: Option<String>,
    pub default_headers: Vec<(String, String)>,
    pub correlation_header_keys: Vec<String>,
    pub retry: RetryPolicy,
    /// Wall-clock cutoff for accepting old-style synchronous task results.
    /// `None` disables the legacy compatibility path entirely.
    pub legacy_sync_cutoff: Option<DateTime<Utc>>,
}

impl PhoenixConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            auth_mode: None,
            default_headers: Vec::new(),
            correlation_header_keys: DEFAULT_CORRELATION_HEADERS
                .iter()
                .map(|key| (*key).to_string())
                .collect(),
            retry: RetryPolicy::default(),
            legacy_sync_cutoff: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(TokenSource::Static(token.into()));
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token = Some(TokenSource::Provider(provider));
        self
    }

    pub fn with_auth_mode(mut self, mode: impl Into<String>) -> Self {
        self.auth_mode = Some(mode.into());
        self
    }

    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_correlation_header_keys(mut self, keys: Vec<String>) -> Self {
        self.correlation_header_keys = keys;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_legacy_sync_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.legacy_sync_cutoff = Some(cutoff);
        self
    }
}
