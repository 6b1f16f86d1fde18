pub mod adapter;
pub mod runtime;

pub use adapter::{
    ResyncContext, ResyncObserver, ResyncSource, SendDeltaOutcome, SessionSyncAdapter,
    SessionSyncClient, SnapshotProvider,
};
pub use runtime::{EngineRuntime, RealtimeConnectOptions, RuntimeClient};
