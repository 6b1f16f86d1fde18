//! Session synchronization: snapshot/delta upload with automatic full-resync
//! recovery.
//!
//! Two triggers share one recovery path: an HTTP 409 on a delta upload, and a
//! server-pushed `session.resync_required` event. Concurrent triggers join a
//! single in-flight resync instead of stacking snapshot uploads.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::PhoenixError;
use crate::protocol::events::RealtimeServerEvent;
use crate::protocol::{
    DeltaUpdateAcceptedResponse, DeltaUpdateRequest, SessionStartAcceptedResponse,
    SessionStartSnapshotRequest,
};
use crate::transport::http::RequestOptions;
use crate::transport::realtime::RealtimeEvents;

/// The slice of the control plane the adapter drives. [`crate::PhoenixClient`]
/// implements it; tests substitute doubles.
#[async_trait]
pub trait SessionSyncClient: Send + Sync {
    async fn session_start(
        &self,
        request: &SessionStartSnapshotRequest,
        options: Option<RequestOptions>,
    ) -> Result<SessionStartAcceptedResponse, PhoenixError>;

    async fn session_delta(
        &self,
        request: &DeltaUpdateRequest,
        options: Option<RequestOptions>,
    ) -> Result<DeltaUpdateAcceptedResponse, PhoenixError>;
}

/// Produces the full-state snapshot uploaded on session start and on every
/// resync. Called once per resync so the snapshot reflects current state.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot(&self) -> Result<SessionStartSnapshotRequest, PhoenixError>;
}

/// Observer hook invoked when a resync is actually initiated (joiners do not
/// re-notify). An observer failure aborts the resync and propagates.
#[async_trait]
pub trait ResyncObserver: Send + Sync {
    async fn on_resync(&self, context: &ResyncContext) -> Result<(), PhoenixError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncSource {
    HttpConflict,
    RealtimeResyncRequired,
}

impl fmt::Display for ResyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResyncSource::HttpConflict => "http_409_conflict",
            ResyncSource::RealtimeResyncRequired => "realtime_resync_required",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResyncContext {
    pub session_id: String,
    pub source: ResyncSource,
    pub reason: Option<String>,
    pub last_confirmed_seq: Option<u64>,
    /// The realtime event that requested the resync, when that was the trigger.
    pub trigger_event: Option<RealtimeServerEvent>,
    /// The conflict error that triggered the resync, when that was the trigger.
    pub trigger_error: Option<PhoenixError>,
}

/// Result of [`SessionSyncAdapter::send_delta_with_recovery`]: either the
/// delta acknowledgement, or confirmation that a conflict was recovered by a
/// full resync (in which case the delta itself was superseded).
#[derive(Debug, Clone, PartialEq)]
pub struct SendDeltaOutcome {
    pub recovered_by_resync: bool,
    pub ack: Option<DeltaUpdateAcceptedResponse>,
}

type ResyncFuture = Shared<BoxFuture<'static, Result<SessionStartAcceptedResponse, PhoenixError>>>;

pub struct SessionSyncAdapter {
    client: Arc<dyn SessionSyncClient>,
    snapshots: Arc<dyn SnapshotProvider>,
    observer: Option<Arc<dyn ResyncObserver>>,
    session_id: String,
    base_options: Option<RequestOptions>,
    resync_in_flight: Mutex<Option<ResyncFuture>>,
}

impl SessionSyncAdapter {
    pub fn new(
        client: Arc<dyn SessionSyncClient>,
        snapshots: Arc<dyn SnapshotProvider>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            snapshots,
            observer: None,
            session_id: session_id.into(),
            base_options: None,
            resync_in_flight: Mutex::new(None),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_base_options(mut self, options: RequestOptions) -> Self {
        self.base_options = Some(options);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Upload the initial full-state snapshot.
    pub async fn start_session(
        &self,
        options: Option<RequestOptions>,
    ) -> Result<SessionStartAcceptedResponse, PhoenixError> {
        let snapshot = self.snapshots.snapshot().await?;
        self.assert_session(&snapshot.session_id)?;
        self.client
            .session_start(&snapshot, self.merge_options(options))
            .await
    }

    /// Upload a delta; on a 409 conflict, recover by resyncing the full
    /// snapshot instead of surfacing the conflict.
    pub async fn send_delta_with_recovery(
        &self,
        request: &DeltaUpdateRequest,
        options: Option<RequestOptions>,
    ) -> Result<SendDeltaOutcome, PhoenixError> {
        self.assert_session(&request.session_id)?;

        match self
            .client
            .session_delta(request, self.merge_options(options))
            .await
        {
            Ok(ack) => Ok(SendDeltaOutcome {
                recovered_by_resync: false,
                ack: Some(ack),
            }),
            Err(error) if error.is_conflict() => {
                tracing::info!(
                    session_id = %self.session_id,
                    sequence = request.sequence,
                    "delta rejected with a conflict, resyncing full snapshot"
                );
                self.perform_resync(ResyncContext {
                    session_id: self.session_id.clone(),
                    source: ResyncSource::HttpConflict,
                    reason: Some(ResyncSource::HttpConflict.to_string()),
                    last_confirmed_seq: None,
                    trigger_event: None,
                    trigger_error: Some(error),
                })
                .await?;
                Ok(SendDeltaOutcome {
                    recovered_by_resync: true,
                    ack: None,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// React to a realtime event. Returns `true` when the event was a resync
    /// request addressed to this session.
    pub async fn handle_realtime_event(
        &self,
        event: &RealtimeServerEvent,
    ) -> Result<bool, PhoenixError> {
        let RealtimeServerEvent::SessionResyncRequired(request) = event else {
            return Ok(false);
        };
        if request.session_id != self.session_id {
            tracing::debug!(
                session_id = %request.session_id,
                "ignoring resync request for another session"
            );
            return Ok(false);
        }

        self.perform_resync(ResyncContext {
            session_id: self.session_id.clone(),
            source: ResyncSource::RealtimeResyncRequired,
            reason: Some(request.reason.clone()),
            last_confirmed_seq: Some(request.last_confirmed_seq),
            trigger_event: Some(event.clone()),
            trigger_error: None,
        })
        .await?;
        Ok(true)
    }

    /// Drive a realtime channel until it closes, reacting to resync requests.
    /// Cancellation stops the loop without error.
    pub async fn consume_realtime_events(
        &self,
        events: &RealtimeEvents,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), PhoenixError> {
        loop {
            let pulled = match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    pulled = events.next() => pulled,
                },
                None => events.next().await,
            };

            match pulled? {
                None => return Ok(()),
                Some(event) => {
                    self.handle_realtime_event(&event).await?;
                }
            }
        }
    }

    /// Join the in-flight resync if one exists, otherwise claim the slot and
    /// run the snapshot upload. Whichever awaiter observes the shared
    /// operation settle clears the slot, provided the slot still holds that
    /// same operation. The claimer being dropped mid-await (caller timeout or
    /// abort) therefore cannot leave a settled operation stuck in the slot.
    pub async fn perform_resync(
        &self,
        context: ResyncContext,
    ) -> Result<SessionStartAcceptedResponse, PhoenixError> {
        let shared = {
            let mut slot = self.resync_in_flight.lock();
            match slot.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let shared = self.resync_future(context).shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;

        let mut slot = self.resync_in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&shared)) {
            *slot = None;
        }
        result
    }

    fn resync_future(
        &self,
        context: ResyncContext,
    ) -> BoxFuture<'static, Result<SessionStartAcceptedResponse, PhoenixError>> {
        let client = self.client.clone();
        let snapshots = self.snapshots.clone();
        let observer = self.observer.clone();
        let options = self.base_options.clone();
        let session_id = self.session_id.clone();

        async move {
            tracing::info!(
                session_id = %context.session_id,
                source = %context.source,
                "resyncing session with a full snapshot"
            );
            if let Some(observer) = &observer {
                observer.on_resync(&context).await?;
            }

            let snapshot = snapshots.snapshot().await?;
            if snapshot.session_id != session_id {
                return Err(session_mismatch(&session_id, &snapshot.session_id));
            }
            client.session_start(&snapshot, options).await
        }
        .boxed()
    }

    fn merge_options(&self, options: Option<RequestOptions>) -> Option<RequestOptions> {
        RequestOptions::merged(self.base_options.as_ref(), options)
    }

    fn assert_session(&self, actual: &str) -> Result<(), PhoenixError> {
        if actual == self.session_id {
            Ok(())
        } else {
            Err(session_mismatch(&self.session_id, actual))
        }
    }
}

fn session_mismatch(expected: &str, actual: &str) -> PhoenixError {
    PhoenixError::validation("payload session_id does not match the adapter's session")
        .with_details(json!({ "expected": expected, "actual": actual }))
}
