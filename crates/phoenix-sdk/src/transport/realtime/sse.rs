//! Server-push-stream realtime transport: a long-lived HTTP response with
//! `text/event-stream` framing, consumed as a byte stream.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::error::PhoenixError;
use crate::transport::realtime::{RealtimeTransport, RealtimeTransportFactory, TransportEvent};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

pub struct SseFactory {
    client: reqwest::Client,
}

impl SseFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SseFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeTransportFactory for SseFactory {
    async fn connect(&self, url: &str) -> Result<Box<dyn RealtimeTransport>, PhoenixError> {
        let response = self
            .client
            .get(url)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|err| {
                PhoenixError::network(format!("realtime event stream connect failed: {err}"), true)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PhoenixError::network(
                format!("realtime event stream rejected with status {status}"),
                true,
            ));
        }

        Ok(Box::new(SseTransport {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            pending: VecDeque::new(),
        }))
    }
}

pub struct SseTransport {
    stream: ByteStream,
    buffer: String,
    pending: VecDeque<TransportEvent>,
}

#[async_trait]
impl RealtimeTransport for SseTransport {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            match self.stream.next().await {
                // Stream end is the server-push equivalent of a normal close.
                None => return None,
                Some(Err(err)) => return Some(TransportEvent::Error(err.to_string())),
                Some(Ok(chunk)) => {
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&chunk).replace("\r\n", "\n"));
                    self.drain_frames();
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        // Dropping the response stream tears down the connection.
        self.pending.clear();
    }
}

impl SseTransport {
    /// Split complete frames (blank-line terminated) out of the buffer and
    /// queue their concatenated `data:` payloads.
    fn drain_frames(&mut self) {
        while let Some(boundary) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..boundary + 2).collect();
            let data: Vec<&str> = frame
                .lines()
                .filter_map(|line| {
                    line.strip_prefix("data:")
                        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
                })
                .collect();
            if !data.is_empty() {
                self.pending
                    .push_back(TransportEvent::Message(data.join("\n")));
            }
        }
    }
}
