use scriptlink_core::{CursorConfig, DriverError, EvalMode, HarvestSource, RawCandidateEvent};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Harvester;
use crate::executor::ScriptExecutor;
use crate::scripts;

pub type ScanScript = Arc<dyn Fn(i64) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    last_seen_position: i64,
}

impl Cursor {
    pub fn new(start: i64) -> Self {
        Self {
            last_seen_position: start,
        }
    }

    pub fn position(&self) -> i64 {
        self.last_seen_position
    }

    pub fn advance(&mut self, to: i64) -> bool {
        if to > self.last_seen_position {
            self.last_seen_position = to;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage {
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
    #[serde(default)]
    pub max_position: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Discovery {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    db_name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct CursorHarvester {
    cursor: Cursor,
    scan: ScanScript,
    discover: Option<String>,
    target: Option<String>,
}

impl CursorHarvester {
    pub fn new(config: &CursorConfig, target: Option<String>) -> Self {
        let scan_config = config.clone();
        Self {
            cursor: Cursor::default(),
            scan: Arc::new(move |bound| scripts::cursor_scan(&scan_config, bound)),
            discover: Some(scripts::cursor_discover(config)),
            target,
        }
    }

    pub fn with_script(scan: ScanScript) -> Self {
        Self {
            cursor: Cursor::default(),
            scan,
            discover: None,
            target: None,
        }
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target.filter(|target| !target.trim().is_empty());
        self
    }

    pub fn starting_at(mut self, position: i64) -> Self {
        self.cursor = Cursor::new(position);
        self
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    async fn discover(&mut self, executor: &ScriptExecutor) -> Result<(), DriverError> {
        let Some(script) = self.discover.as_deref() else {
            return Ok(());
        };
        let found: Discovery = executor.evaluate_as(script, EvalMode::AwaitAsync).await?;
        if !found.success {
            return Err(DriverError::CapabilityUnavailable(
                found
                    .error
                    .unwrap_or_else(|| "store discovery failed".to_string()),
            ));
        }
        info!(
            event = "cursor_store_found",
            session_id = %executor.session().id(),
            database = found.db_name.as_deref().unwrap_or_default()
        );
        self.discover = None;
        Ok(())
    }

    fn matches_target(&self, row: &Map<String, Value>) -> bool {
        let Some(target) = self.target.as_deref() else {
            return true;
        };
        ["to", "target"]
            .iter()
            .any(|key| row.get(*key).and_then(Value::as_str) == Some(target))
    }
}

fn row_position(row: &Map<String, Value>) -> Option<i64> {
    match row.get("position")? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl Harvester for CursorHarvester {
    fn source(&self) -> HarvestSource {
        HarvestSource::CursorScan
    }

    async fn poll(
        &mut self,
        executor: &ScriptExecutor,
    ) -> Result<Vec<RawCandidateEvent>, DriverError> {
        self.discover(executor).await?;
        let bound = self.cursor.position();
        let page: CursorPage = executor
            .evaluate_as((self.scan)(bound), EvalMode::AwaitAsync)
            .await?;
        if let Some(error) = page.error.filter(|error| !error.is_empty()) {
            return Err(executor.classifier().classify(&error, None));
        }

        let mut observed = page.max_position.unwrap_or(bound);
        let mut stale = 0usize;
        let mut events = Vec::with_capacity(page.rows.len());
        for row in page.rows {
            let Some(position) = row_position(&row) else {
                warn!(
                    event = "cursor_row_without_position",
                    session_id = %executor.session().id()
                );
                continue;
            };
            if position <= bound {
                stale += 1;
                continue;
            }
            observed = observed.max(position);
            if self.matches_target(&row) {
                events.push(RawCandidateEvent::new(HarvestSource::CursorScan, row));
            }
        }
        if stale > 0 {
            warn!(
                event = "cursor_stale_rows_dropped",
                session_id = %executor.session().id(),
                bound,
                stale
            );
        }
        if self.cursor.advance(observed) {
            debug!(event = "cursor_advanced", from = bound, to = observed, rows = events.len());
        }
        Ok(events)
    }
}
