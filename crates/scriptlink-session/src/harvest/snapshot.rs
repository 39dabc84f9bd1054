use scriptlink_core::{DriverError, EvalMode, HarvestSource, RawCandidateEvent, SnapshotConfig};
use serde_json::{Map, Value};

use super::Harvester;
use crate::executor::ScriptExecutor;
use crate::scripts;

#[derive(Debug, Clone)]
pub struct SnapshotHarvester {
    script: String,
}

impl SnapshotHarvester {
    pub fn new(config: &SnapshotConfig) -> Self {
        Self::with_script(scripts::snapshot(config))
    }

    pub fn with_script(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl Harvester for SnapshotHarvester {
    fn source(&self) -> HarvestSource {
        HarvestSource::Snapshot
    }

    async fn poll(
        &mut self,
        executor: &ScriptExecutor,
    ) -> Result<Vec<RawCandidateEvent>, DriverError> {
        let entries: Vec<Map<String, Value>> = executor
            .evaluate_as(self.script.as_str(), EvalMode::Sync)
            .await?;
        Ok(entries
            .into_iter()
            .map(|fields| RawCandidateEvent::new(HarvestSource::Snapshot, fields))
            .filter(|raw| !raw.bool_field("isSelf"))
            .collect())
    }
}
