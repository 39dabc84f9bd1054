mod cursor;
mod hook;
mod pipeline;
mod poller;
mod snapshot;

use scriptlink_core::{DriverError, HarvestSource, RawCandidateEvent};
use serde::Serialize;
use std::future::Future;

use crate::executor::ScriptExecutor;

pub use cursor::{Cursor, CursorHarvester, CursorPage, ScanScript};
pub use hook::{HookHarvester, HookInstall};
pub use pipeline::{shared_dedup, EventPipeline, PipelineReport, SharedDedup, SinkClosed};
pub use poller::{PollerHandle, PollerSet};
pub use snapshot::SnapshotHarvester;

pub trait Harvester: Send + 'static {
    fn source(&self) -> HarvestSource;

    fn poll(
        &mut self,
        executor: &ScriptExecutor,
    ) -> impl Future<Output = Result<Vec<RawCandidateEvent>, DriverError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub candidates: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub dropped: u64,
    pub cache_clears: u64,
}

impl HarvestStats {
    pub fn absorb(&mut self, report: &PipelineReport) {
        self.candidates += report.candidates;
        self.emitted += report.emitted;
        self.suppressed += report.suppressed;
        self.dropped += report.dropped;
    }
}
