use anyhow::{Context, Result};
use scriptlink_core::wire::{encode_frame, DEFAULT_MAX_FRAME_BYTES};
use scriptlink_core::{CanonicalEvent, HarvestConfig};
use scriptlink_session::{
    shared_dedup, CursorHarvester, EventPipeline, HookHarvester, PollerSet, ScriptExecutor,
    Session, SharedDedup, SnapshotHarvester,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::RuntimeConfig;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

// Dedup caches outlive individual sessions so a reconnect does not replay
// events that were already written.
struct Caches {
    hook: SharedDedup,
    cursor: SharedDedup,
    snapshot: SharedDedup,
}

impl Caches {
    fn new(config: &HarvestConfig) -> Self {
        if config.shared_dedup {
            let cache = shared_dedup(&config.shared_dedup_config());
            return Self {
                hook: cache.clone(),
                cursor: cache.clone(),
                snapshot: cache,
            };
        }
        Self {
            hook: shared_dedup(&config.hook.dedup),
            cursor: shared_dedup(&config.cursor.dedup),
            snapshot: shared_dedup(&config.snapshot.dedup),
        }
    }
}

pub async fn run(
    config: &RuntimeConfig,
    harvest: HarvestConfig,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    harvest.validate().context("invalid harvest configuration")?;
    let caches = Caches::new(&harvest);
    let (sink, events) = mpsc::channel(harvest.sink_capacity);
    let writer = tokio::spawn(write_events(events));

    let mut backoff = INITIAL_BACKOFF;
    loop {
        if *stop.borrow() {
            break;
        }
        let connected = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            connected = config.connector.connect() => connected,
        };
        match connected {
            Ok(link) => {
                backoff = INITIAL_BACKOFF;
                let session = Session::start(link, config.driver.clone());
                let pollers = spawn_pollers(&session, &harvest, &caches, &sink);
                let interrupted = tokio::select! {
                    _ = stop.wait_for(|stopped| *stopped) => true,
                    _ = session.closed() => false,
                };
                session.close();
                for (source, stats) in pollers.join().await {
                    info!(
                        event = "harvester_stats",
                        session_id = %session.id(),
                        harvester = source.as_str(),
                        ticks = stats.ticks,
                        failed_ticks = stats.failed_ticks,
                        emitted = stats.emitted,
                        suppressed = stats.suppressed,
                        dropped = stats.dropped
                    );
                }
                if interrupted {
                    break;
                }
                warn!(
                    event = "watch_session_lost",
                    session_id = %session.id(),
                    backoff_ms = backoff.as_millis() as u64
                );
            }
            Err(err) => {
                warn!(
                    event = "watch_connect_failed",
                    url = %config.connector.url(),
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64
                );
            }
        }
        tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);
    }

    drop(sink);
    finish_writer(writer).await
}

fn spawn_pollers(
    session: &Session,
    harvest: &HarvestConfig,
    caches: &Caches,
    sink: &mpsc::Sender<CanonicalEvent>,
) -> PollerSet {
    let mut pollers = PollerSet::new(ScriptExecutor::new(session.clone()));
    if harvest.hook.enabled {
        pollers.spawn(
            HookHarvester::new(&harvest.hook),
            EventPipeline::shared(&harvest.hook.dedup, caches.hook.clone(), sink.clone()),
            Duration::from_millis(harvest.hook.interval_ms),
        );
    }
    if harvest.cursor.enabled {
        pollers.spawn(
            CursorHarvester::new(&harvest.cursor, harvest.target.clone()),
            EventPipeline::shared(&harvest.cursor.dedup, caches.cursor.clone(), sink.clone()),
            Duration::from_millis(harvest.cursor.interval_ms),
        );
    }
    if harvest.snapshot.enabled {
        pollers.spawn(
            SnapshotHarvester::new(&harvest.snapshot),
            EventPipeline::shared(&harvest.snapshot.dedup, caches.snapshot.clone(), sink.clone()),
            Duration::from_millis(harvest.snapshot.interval_ms),
        );
    }
    info!(event = "watch_started", session_id = %session.id(), harvesters = pollers.len());
    pollers
}

async fn write_events(mut events: mpsc::Receiver<CanonicalEvent>) -> Result<u64> {
    let mut stdout = tokio::io::stdout();
    let mut written = 0u64;
    while let Some(event) = events.recv().await {
        let line = encode_frame(&event, DEFAULT_MAX_FRAME_BYTES)?;
        stdout.write_all(&line).await.context("stdout write failed")?;
        stdout.flush().await.context("stdout flush failed")?;
        written += 1;
    }
    Ok(written)
}

async fn finish_writer(writer: JoinHandle<Result<u64>>) -> Result<()> {
    let written = writer.await.context("event writer panicked")??;
    info!(event = "watch_end", written);
    Ok(())
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}
