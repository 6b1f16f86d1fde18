//! Client SDK for the Phoenix engine assistant control plane.
//!
//! The crate is layered bottom-up:
//!
//! - [`transport`] executes HTTP requests with retry, backoff, and
//!   cancellation, and normalizes websocket/SSE pushes into one ordered
//!   realtime event channel;
//! - [`protocol`] holds the strict wire contracts and the typed realtime
//!   event union;
//! - [`client`] wraps every control-plane endpoint and races realtime
//!   signals against polling for plan readiness;
//! - [`session`] keeps editor state synchronized (snapshot, deltas,
//!   deduplicated conflict resync) and exposes the [`EngineRuntime`] facade
//!   frontends embed.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{PhoenixClient, TaskSubmission, WaitForPlanReadyOptions};
pub use config::{PhoenixConfig, TokenProvider, TokenSource};
pub use error::{ErrorKind, PhoenixError};
pub use session::{
    EngineRuntime, RealtimeConnectOptions, ResyncContext, ResyncObserver, ResyncSource,
    RuntimeClient, SendDeltaOutcome, SessionSyncAdapter, SessionSyncClient, SnapshotProvider,
};
pub use transport::{
    HttpRequest, HttpRequester, HttpResponse, PhoenixTransport, RealtimeEvents, RealtimeOptions,
    RealtimeTransport, RealtimeTransportFactory, RealtimeTransportKind, RequestArgs,
    RequestOptions, RetryOverride, RetryPolicy, TransportEvent,
};
