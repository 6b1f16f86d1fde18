//! Runtime facade: one object owning the session lifecycle, the realtime
//! connection, and plan readiness on behalf of an embedding frontend.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::WaitForPlanReadyOptions;
use crate::error::PhoenixError;
use crate::protocol::events::RealtimeServerEvent;
use crate::protocol::{
    DeltaUpdateAcceptedResponse, DeltaUpdateRequest, RealtimeNegotiateRequest,
    RealtimeNegotiateResponse, SchemaVersion, SessionStartAcceptedResponse,
    SessionStartSnapshotRequest, TaskStatusResponse,
};
use crate::session::adapter::{
    ResyncObserver, SendDeltaOutcome, SessionSyncAdapter, SessionSyncClient, SnapshotProvider,
};
use crate::transport::http::RequestOptions;
use crate::transport::realtime::{
    RealtimeEvents, RealtimeOptions, RealtimeTransportFactory, RealtimeTransportKind,
};

/// The control-plane surface the runtime needs. [`crate::PhoenixClient`]
/// implements it.
#[async_trait]
pub trait RuntimeClient: SessionSyncClient {
    async fn realtime_negotiate(
        &self,
        request: &RealtimeNegotiateRequest,
        options: Option<RequestOptions>,
    ) -> Result<RealtimeNegotiateResponse, PhoenixError>;

    async fn task_status(
        &self,
        plan_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<TaskStatusResponse, PhoenixError>;

    async fn wait_for_plan_ready(
        &self,
        plan_id: &str,
        options: WaitForPlanReadyOptions,
    ) -> Result<TaskStatusResponse, PhoenixError>;
}

/// Adapter-facing view of a [`RuntimeClient`]. Delegation sidesteps trait
/// object upcasting between the two trait objects.
struct RuntimeSyncBridge(Arc<dyn RuntimeClient>);

#[async_trait]
impl SessionSyncClient for RuntimeSyncBridge {
    async fn session_start(
        &self,
        request: &SessionStartSnapshotRequest,
        options: Option<RequestOptions>,
    ) -> Result<SessionStartAcceptedResponse, PhoenixError> {
        self.0.session_start(request, options).await
    }

    async fn session_delta(
        &self,
        request: &DeltaUpdateRequest,
        options: Option<RequestOptions>,
    ) -> Result<DeltaUpdateAcceptedResponse, PhoenixError> {
        self.0.session_delta(request, options).await
    }
}

/// How the runtime opens realtime connections; negotiation supplies the URL
/// and token at connect time.
#[derive(Clone, Default)]
pub struct RealtimeConnectOptions {
    pub transport: RealtimeTransportKind,
    pub cancel: Option<CancellationToken>,
    pub websocket_factory: Option<Arc<dyn RealtimeTransportFactory>>,
    pub sse_factory: Option<Arc<dyn RealtimeTransportFactory>>,
}

pub struct EngineRuntime {
    client: Arc<dyn RuntimeClient>,
    session_id: String,
    user_id: String,
    adapter: SessionSyncAdapter,
    connect_options: RealtimeConnectOptions,
    realtime: Mutex<Option<(RealtimeEvents, RealtimeNegotiateResponse)>>,
}

impl EngineRuntime {
    pub fn new(
        client: Arc<dyn RuntimeClient>,
        snapshots: Arc<dyn SnapshotProvider>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let session_id = session_id.into();
        let adapter = SessionSyncAdapter::new(
            Arc::new(RuntimeSyncBridge(client.clone())),
            snapshots,
            session_id.clone(),
        );
        Self {
            client,
            session_id,
            user_id: user_id.into(),
            adapter,
            connect_options: RealtimeConnectOptions::default(),
            realtime: Mutex::new(None),
        }
    }

    pub fn with_connect_options(mut self, options: RealtimeConnectOptions) -> Self {
        self.connect_options = options;
        self
    }

    pub fn with_resync_observer(mut self, observer: Arc<dyn ResyncObserver>) -> Self {
        self.adapter = self.adapter.with_observer(observer);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn start_session(
        &self,
        options: Option<RequestOptions>,
    ) -> Result<SessionStartAcceptedResponse, PhoenixError> {
        self.adapter.start_session(options).await
    }

    /// Negotiate a realtime endpoint and connect. An existing connection is
    /// closed first so at most one channel is held at a time.
    pub async fn connect_realtime(&self) -> Result<RealtimeEvents, PhoenixError> {
        let negotiation = self
            .client
            .realtime_negotiate(
                &RealtimeNegotiateRequest {
                    schema_version: SchemaVersion::V1,
                    session_id: self.session_id.clone(),
                    user_id: self.user_id.clone(),
                },
                None,
            )
            .await?;

        self.disconnect_realtime();

        let mut options = RealtimeOptions::new(&negotiation.url)
            .with_access_token(&negotiation.access_token)
            .with_transport(self.connect_options.transport);
        if let Some(cancel) = &self.connect_options.cancel {
            options = options.with_cancel(cancel.clone());
        }
        if let Some(factory) = &self.connect_options.websocket_factory {
            options = options.with_websocket_factory(factory.clone());
        }
        if let Some(factory) = &self.connect_options.sse_factory {
            options = options.with_sse_factory(factory.clone());
        }

        let events = RealtimeEvents::connect(options).await?;
        tracing::debug!(
            session_id = %self.session_id,
            url = %negotiation.url,
            "realtime channel connected"
        );
        *self.realtime.lock() = Some((events.clone(), negotiation));
        Ok(events)
    }

    pub fn disconnect_realtime(&self) {
        if let Some((events, _)) = self.realtime.lock().take() {
            events.close();
        }
    }

    pub fn realtime_events(&self) -> Option<RealtimeEvents> {
        self.realtime.lock().as_ref().map(|(events, _)| events.clone())
    }

    pub fn realtime_negotiation(&self) -> Option<RealtimeNegotiateResponse> {
        self.realtime
            .lock()
            .as_ref()
            .map(|(_, negotiation)| negotiation.clone())
    }

    pub async fn send_delta_with_recovery(
        &self,
        request: &DeltaUpdateRequest,
        options: Option<RequestOptions>,
    ) -> Result<SendDeltaOutcome, PhoenixError> {
        self.adapter.send_delta_with_recovery(request, options).await
    }

    pub async fn handle_realtime_event(
        &self,
        event: &RealtimeServerEvent,
    ) -> Result<bool, PhoenixError> {
        self.adapter.handle_realtime_event(event).await
    }

    /// Drive the held realtime channel until it closes: resync requests go to
    /// the adapter, every event is forwarded to `handler`.
    pub async fn run_realtime_loop(
        &self,
        mut handler: impl FnMut(&RealtimeServerEvent) + Send,
    ) -> Result<(), PhoenixError> {
        let Some(events) = self.realtime_events() else {
            return Err(PhoenixError::validation(
                "no realtime channel is connected; call connect_realtime first",
            ));
        };

        loop {
            match events.next().await? {
                None => return Ok(()),
                Some(event) => {
                    self.adapter.handle_realtime_event(&event).await?;
                    handler(&event);
                }
            }
        }
    }

    pub async fn task_status(
        &self,
        plan_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<TaskStatusResponse, PhoenixError> {
        self.client.task_status(plan_id, options).await
    }

    /// Wait for a plan to become ready, using the held realtime channel for
    /// the fast path unless the caller supplies their own source.
    pub async fn wait_for_plan_ready(
        &self,
        plan_id: &str,
        mut options: WaitForPlanReadyOptions,
    ) -> Result<TaskStatusResponse, PhoenixError> {
        if options.events.is_none() {
            options.events = self.realtime_events();
        }
        self.client.wait_for_plan_ready(plan_id, options).await
    }
}
