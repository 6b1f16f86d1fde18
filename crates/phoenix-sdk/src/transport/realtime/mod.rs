//! Realtime event channel: normalizes the two push transports into one
//! cancellable, ordered, typed event sequence.
//!
//! One pump task owns the transport: it unwraps and validates payloads into
//! the queue, and it alone performs teardown, so cleanup runs at most once.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::PhoenixError;
use crate::protocol::events::RealtimeServerEvent;

mod queue;
pub mod sse;
pub mod websocket;

use queue::EventQueue;
use sse::SseFactory;
use websocket::WebSocketFactory;

/// WebSocket normal-closure code; anything else terminates the channel with
/// a retriable error.
const NORMAL_CLOSE_CODE: u16 = 1000;

/// Bounded unwrap attempts so a malformed envelope cannot loop forever.
const MAX_ENVELOPE_DEPTH: usize = 4;

/// Raw occurrences surfaced by a transport implementation.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    Closed(Option<u16>),
}

#[async_trait]
pub trait RealtimeTransport: Send {
    /// Next raw transport occurrence; `None` means the underlying stream
    /// ended normally.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    async fn shutdown(&mut self);
}

/// Pluggable transport constructor, for test doubles and alternative
/// runtimes.
#[async_trait]
pub trait RealtimeTransportFactory: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn RealtimeTransport>, PhoenixError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RealtimeTransportKind {
    #[default]
    Auto,
    WebSocket,
    Sse,
}

#[derive(Clone)]
pub struct RealtimeOptions {
    pub url: String,
    pub access_token: Option<String>,
    pub transport: RealtimeTransportKind,
    pub cancel: Option<CancellationToken>,
    pub websocket_factory: Option<Arc<dyn RealtimeTransportFactory>>,
    pub sse_factory: Option<Arc<dyn RealtimeTransportFactory>>,
    default_transports: bool,
}

impl RealtimeOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
            transport: RealtimeTransportKind::Auto,
            cancel: None,
            websocket_factory: None,
            sse_factory: None,
            default_transports: true,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_transport(mut self, transport: RealtimeTransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_websocket_factory(mut self, factory: Arc<dyn RealtimeTransportFactory>) -> Self {
        self.websocket_factory = Some(factory);
        self
    }

    pub fn with_sse_factory(mut self, factory: Arc<dyn RealtimeTransportFactory>) -> Self {
        self.sse_factory = Some(factory);
        self
    }

    /// Disable the built-in websocket/SSE constructors so only explicit
    /// factories are eligible. Selection then fails fast when none matches.
    pub fn without_default_transports(mut self) -> Self {
        self.default_transports = false;
        self
    }
}

/// Handle to the ordered event sequence. Cloneable; `close` is idempotent
/// and pending pulls resolve as end-of-sequence.
#[derive(Clone)]
pub struct RealtimeEvents {
    queue: Arc<EventQueue<RealtimeServerEvent>>,
    shutdown: CancellationToken,
}

impl RealtimeEvents {
    pub async fn connect(options: RealtimeOptions) -> Result<Self, PhoenixError> {
        let queue = Arc::new(EventQueue::new());
        let shutdown = CancellationToken::new();

        // A token already cancelled closes the channel without opening any
        // connection.
        if let Some(cancel) = &options.cancel {
            if cancel.is_cancelled() {
                queue.close();
                return Ok(Self { queue, shutdown });
            }
        }

        let factory = resolve_factory(&options)?;
        let stream_url = build_stream_url(&options.url, options.access_token.as_deref());
        let transport = factory.connect(&stream_url).await?;

        tokio::spawn(pump(
            transport,
            queue.clone(),
            shutdown.clone(),
            options.cancel.clone(),
        ));

        Ok(Self { queue, shutdown })
    }

    /// Next event in arrival order. `Ok(None)` once the channel has closed
    /// normally; a terminal failure is replayed to every subsequent pull.
    pub async fn next(&self) -> Result<Option<RealtimeServerEvent>, PhoenixError> {
        self.queue.next().await
    }

    pub fn close(&self) {
        self.shutdown.cancel();
        self.queue.close();
    }
}

async fn pump(
    mut transport: Box<dyn RealtimeTransport>,
    queue: Arc<EventQueue<RealtimeServerEvent>>,
    shutdown: CancellationToken,
    cancel: Option<CancellationToken>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                transport.shutdown().await;
                queue.close();
                return;
            }
            _ = cancelled_or_never(cancel.as_ref()) => {
                transport.shutdown().await;
                queue.close();
                return;
            }
            event = transport.next_event() => event,
        };

        match event {
            None => {
                queue.close();
                return;
            }
            Some(TransportEvent::Message(raw)) => match interpret_payload(&raw) {
                Ok(event) => {
                    tracing::trace!(event = event.name(), "realtime event");
                    queue.push(event);
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        "realtime payload failed validation, terminating channel"
                    );
                    transport.shutdown().await;
                    queue.fail(error);
                    return;
                }
            },
            Some(TransportEvent::Error(message)) => {
                transport.shutdown().await;
                queue.fail(PhoenixError::network(
                    format!("realtime transport error: {message}"),
                    true,
                ));
                return;
            }
            Some(TransportEvent::Closed(code)) => {
                match code {
                    Some(code) if code != NORMAL_CLOSE_CODE => {
                        tracing::debug!(code, "realtime transport closed abnormally");
                        queue.fail(PhoenixError::network(
                            format!("realtime transport closed with code {code}"),
                            true,
                        ));
                    }
                    _ => queue.close(),
                }
                return;
            }
        }
    }
}

async fn cancelled_or_never(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn resolve_factory(
    options: &RealtimeOptions,
) -> Result<Arc<dyn RealtimeTransportFactory>, PhoenixError> {
    let websocket = options.websocket_factory.clone().or_else(|| {
        options
            .default_transports
            .then(|| Arc::new(WebSocketFactory::new()) as Arc<dyn RealtimeTransportFactory>)
    });
    let sse = options.sse_factory.clone().or_else(|| {
        options
            .default_transports
            .then(|| Arc::new(SseFactory::new()) as Arc<dyn RealtimeTransportFactory>)
    });

    let no_transport = || {
        PhoenixError::network(
            "no realtime transport is available; provide a websocket or sse factory",
            false,
        )
    };

    match options.transport {
        RealtimeTransportKind::WebSocket => websocket.ok_or_else(no_transport),
        RealtimeTransportKind::Sse => sse.ok_or_else(no_transport),
        RealtimeTransportKind::Auto => websocket.or(sse).ok_or_else(no_transport),
    }
}

/// Append the access token as a query parameter; URL-safe when the address
/// parses, raw concatenation as the fallback.
fn build_stream_url(url: &str, access_token: Option<&str>) -> String {
    let Some(token) = access_token else {
        return url.to_string();
    };

    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair("access_token", token);
            parsed.to_string()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
            format!("{url}{separator}access_token={encoded}")
        }
    }
}

/// Unwrap transport envelopes and validate the candidate payload into the
/// typed event union.
fn interpret_payload(raw: &str) -> Result<RealtimeServerEvent, PhoenixError> {
    let payload = unwrap_payload(Value::String(raw.to_string()));
    RealtimeServerEvent::from_value(payload)
}

fn parse_json_maybe(value: Value) -> Value {
    if let Value::String(text) = &value {
        let trimmed = text.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str(trimmed) {
                return parsed;
            }
        }
    }
    value
}

fn is_event_candidate(value: &Value) -> bool {
    value
        .as_object()
        .map(|object| {
            object.get("schema_version").is_some_and(Value::is_string)
                && object.get("event").is_some_and(Value::is_string)
        })
        .unwrap_or(false)
}

fn unwrap_payload(value: Value) -> Value {
    let mut current = parse_json_maybe(value);

    for _ in 0..MAX_ENVELOPE_DEPTH {
        if is_event_candidate(&current) {
            return current;
        }

        let nested = match current.as_object() {
            Some(object) => object
                .get("data")
                .or_else(|| object.get("message"))
                .cloned(),
            None => return current,
        };

        match nested {
            Some(nested) => current = parse_json_maybe(nested),
            None => return current,
        }
    }

    current
}
