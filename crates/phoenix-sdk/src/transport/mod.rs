pub mod backoff;
pub mod http;
pub mod realtime;

pub use backoff::{next_backoff, sleep_cancellable, RetryOverride, RetryPolicy, JITTER_BOUND_MS};
pub use http::{
    HttpRequest, HttpRequester, HttpResponse, Method, PhoenixTransport, ReqwestRequester,
    RequestArgs, RequestOptions, TransportFailure,
};
pub use realtime::{
    RealtimeEvents, RealtimeOptions, RealtimeTransport, RealtimeTransportFactory,
    RealtimeTransportKind, TransportEvent,
};
