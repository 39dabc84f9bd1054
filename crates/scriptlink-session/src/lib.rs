pub mod correlator;
pub mod executor;
pub mod harvest;
pub mod retry;
pub mod scripts;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use correlator::Correlator;
pub use executor::{decode_value, remote_call, RemoteCall, RemoteOutcome, ScriptExecutor};
pub use harvest::{
    shared_dedup, CursorHarvester, EventPipeline, HarvestStats, Harvester, HookHarvester,
    PollerSet, SharedDedup, SnapshotHarvester,
};
pub use retry::{execute, execute_with, ConfirmationSpec, RetryPolicy};
pub use session::{AuditOutcome, CommandAudit, Session};
pub use transport::{memory_link, RemoteEnd, TransportLink, WsConnector};
