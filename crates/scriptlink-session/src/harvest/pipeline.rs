use scriptlink_core::{CanonicalEvent, DedupCache, DedupConfig, Normalizer, RawCandidateEvent};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

pub type SharedDedup = Arc<Mutex<DedupCache>>;

pub fn shared_dedup(config: &DedupConfig) -> SharedDedup {
    Arc::new(Mutex::new(DedupCache::new(config.cap)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event sink closed")]
pub struct SinkClosed;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub candidates: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub dropped: u64,
}

enum Dedup {
    Owned(DedupCache),
    Shared(SharedDedup),
}

impl Dedup {
    fn admit(&mut self, key: &str) -> bool {
        match self {
            Dedup::Owned(cache) => cache.check_and_insert(key),
            Dedup::Shared(cache) => cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .check_and_insert(key),
        }
    }

    fn clears(&self) -> u64 {
        match self {
            Dedup::Owned(cache) => cache.clears(),
            Dedup::Shared(cache) => cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clears(),
        }
    }
}

pub struct EventPipeline {
    normalizer: Normalizer,
    dedup: Dedup,
    sink: mpsc::Sender<CanonicalEvent>,
}

impl EventPipeline {
    pub fn new(config: &DedupConfig, sink: mpsc::Sender<CanonicalEvent>) -> Self {
        Self {
            normalizer: Normalizer::new(config),
            dedup: Dedup::Owned(DedupCache::new(config.cap)),
            sink,
        }
    }

    pub fn shared(
        config: &DedupConfig,
        cache: SharedDedup,
        sink: mpsc::Sender<CanonicalEvent>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(config),
            dedup: Dedup::Shared(cache),
            sink,
        }
    }

    pub fn cache_clears(&self) -> u64 {
        self.dedup.clears()
    }

    pub async fn process(
        &mut self,
        batch: Vec<RawCandidateEvent>,
    ) -> Result<PipelineReport, SinkClosed> {
        let mut report = PipelineReport::default();
        for raw in batch {
            report.candidates += 1;
            let Some(event) = self.normalizer.normalize(&raw) else {
                report.dropped += 1;
                continue;
            };
            if !self.dedup.admit(&event.dedup_key) {
                report.suppressed += 1;
                continue;
            }
            self.sink.send(event).await.map_err(|_| SinkClosed)?;
            report.emitted += 1;
        }
        Ok(report)
    }
}
