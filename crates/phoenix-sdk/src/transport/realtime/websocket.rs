//! Duplex-socket realtime transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::PhoenixError;
use crate::transport::realtime::{RealtimeTransport, RealtimeTransportFactory, TransportEvent};

pub struct WebSocketFactory;

impl WebSocketFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WebSocketFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeTransportFactory for WebSocketFactory {
    async fn connect(&self, url: &str) -> Result<Box<dyn RealtimeTransport>, PhoenixError> {
        let (stream, _) = connect_async(url).await.map_err(|err| {
            PhoenixError::network(format!("realtime websocket connect failed: {err}"), true)
        })?;
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.stream.next().await {
                None => return None,
                Some(Ok(Message::Text(text))) => {
                    return Some(TransportEvent::Message(text.to_string()))
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(TransportEvent::Message(
                        String::from_utf8_lossy(&bytes).into_owned(),
                    ))
                }
                Some(Ok(Message::Close(frame))) => {
                    return Some(TransportEvent::Closed(
                        frame.map(|frame| u16::from(frame.code)),
                    ))
                }
                // Control frames are handled by the protocol layer below us.
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Some(TransportEvent::Error(err.to_string())),
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
