use scriptlink_core::HarvestSource;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{EventPipeline, HarvestStats, Harvester};
use crate::executor::ScriptExecutor;

pub struct PollerHandle {
    pub source: HarvestSource,
    stats: watch::Receiver<HarvestStats>,
    task: JoinHandle<HarvestStats>,
}

impl PollerHandle {
    pub fn stats(&self) -> HarvestStats {
        self.stats.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Timers stop once the session shuts down. A tick already in flight runs to
/// completion; no new tick starts after that.
pub struct PollerSet {
    executor: ScriptExecutor,
    pollers: Vec<PollerHandle>,
}

impl PollerSet {
    pub fn new(executor: ScriptExecutor) -> Self {
        Self {
            executor,
            pollers: Vec::new(),
        }
    }

    pub fn spawn<H: Harvester>(
        &mut self,
        harvester: H,
        pipeline: EventPipeline,
        interval: Duration,
    ) {
        let source = harvester.source();
        let (stats_tx, stats_rx) = watch::channel(HarvestStats::default());
        let task = tokio::spawn(run_poller(
            harvester,
            pipeline,
            self.executor.clone(),
            interval.max(Duration::from_millis(1)),
            stats_tx,
        ));
        self.pollers.push(PollerHandle {
            source,
            stats: stats_rx,
            task,
        });
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }

    pub fn stats(&self) -> Vec<(HarvestSource, HarvestStats)> {
        self.pollers
            .iter()
            .map(|poller| (poller.source, poller.stats()))
            .collect()
    }

    pub async fn join(self) -> Vec<(HarvestSource, HarvestStats)> {
        let mut finished = Vec::with_capacity(self.pollers.len());
        for poller in self.pollers {
            let fallback = poller.stats();
            let stats = match poller.task.await {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(
                        event = "poller_join_error",
                        harvester = poller.source.as_str(),
                        error = %err
                    );
                    fallback
                }
            };
            finished.push((poller.source, stats));
        }
        finished
    }
}

async fn run_poller<H: Harvester>(
    mut harvester: H,
    mut pipeline: EventPipeline,
    executor: ScriptExecutor,
    interval: Duration,
    stats_tx: watch::Sender<HarvestStats>,
) -> HarvestStats {
    let name = harvester.source().as_str();
    let session_id = executor.session().id().to_string();
    let mut shutdown = executor.session().shutdown_signal();
    let mut stats = HarvestStats::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        event = "poller_start",
        session_id = %session_id,
        harvester = name,
        interval_ms = interval.as_millis() as u64
    );
    if *shutdown.borrow() {
        return stats;
    }
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                stats.ticks += 1;
                match harvester.poll(&executor).await {
                    Ok(batch) => match pipeline.process(batch).await {
                        Ok(report) => {
                            if report.candidates > 0 {
                                debug!(
                                    event = "poller_tick",
                                    session_id = %session_id,
                                    harvester = name,
                                    candidates = report.candidates,
                                    emitted = report.emitted
                                );
                            }
                            stats.absorb(&report);
                        }
                        Err(err) => {
                            info!(
                                event = "poller_sink_closed",
                                session_id = %session_id,
                                harvester = name,
                                error = %err
                            );
                            break;
                        }
                    },
                    Err(err) => {
                        stats.failed_ticks += 1;
                        warn!(
                            event = "poller_tick_failed",
                            session_id = %session_id,
                            harvester = name,
                            kind = err.kind(),
                            error = %err
                        );
                    }
                }
                stats.cache_clears = pipeline.cache_clears();
                stats_tx.send_replace(stats.clone());
            }
        }
    }
    stats_tx.send_replace(stats.clone());
    info!(
        event = "poller_stop",
        session_id = %session_id,
        harvester = name,
        ticks = stats.ticks,
        emitted = stats.emitted
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::SnapshotHarvester;
    use crate::testing::{scripted_executor, FakeReply};
    use scriptlink_core::DedupConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn failing_ticks_count_as_empty_and_poller_stops_on_close() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = {
            let calls = Arc::clone(&calls);
            scripted_executor(move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    FakeReply::Error("page busy".to_string())
                } else {
                    FakeReply::Value(json!("[{\"sender\":\"bob\",\"text\":\"hi\"}]"))
                }
            })
        };
        let (tx, mut rx) = mpsc::channel(16);
        let mut pollers = PollerSet::new(executor.clone());
        pollers.spawn(
            SnapshotHarvester::with_script("snapshot"),
            EventPipeline::new(&DedupConfig::default(), tx),
            Duration::from_millis(100),
        );

        let event = rx.recv().await.expect("event");
        assert_eq!(event.text, "hi");
        tokio::time::sleep(Duration::from_millis(450)).await;

        executor.session().close();
        let finished = pollers.join().await;
        let (source, stats) = &finished[0];
        assert_eq!(*source, HarvestSource::Snapshot);
        assert!(stats.failed_ticks >= 1);
        assert_eq!(stats.emitted, 1);
        assert!(stats.suppressed >= 1);

        let ticks_at_close = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), ticks_at_close);
    }
}
