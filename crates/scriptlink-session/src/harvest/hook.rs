use scriptlink_core::{DriverError, EvalMode, HarvestSource, HookConfig, RawCandidateEvent};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::Harvester;
use crate::executor::ScriptExecutor;
use crate::scripts;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInstall {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub hooked_events: u32,
}

/// The drain script answers `null` when the interceptor is gone (page reload),
/// in which case the next tick installs it again.
#[derive(Debug, Clone)]
pub struct HookHarvester {
    install_script: String,
    drain_script: String,
    installed: bool,
}

impl HookHarvester {
    pub fn new(config: &HookConfig) -> Self {
        Self::with_scripts(scripts::hook_install(config), scripts::hook_drain())
    }

    pub fn with_scripts(install: impl Into<String>, drain: impl Into<String>) -> Self {
        Self {
            install_script: install.into(),
            drain_script: drain.into(),
            installed: false,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub async fn install(&mut self, executor: &ScriptExecutor) -> Result<HookInstall, DriverError> {
        let report: HookInstall = executor
            .evaluate_as(self.install_script.as_str(), EvalMode::Sync)
            .await?;
        if !report.installed {
            let message = if report.message.is_empty() {
                "hook not installed".to_string()
            } else {
                report.message
            };
            return Err(DriverError::CapabilityUnavailable(message));
        }
        self.installed = true;
        info!(
            event = "hook_installed",
            session_id = %executor.session().id(),
            hooked_events = report.hooked_events
        );
        Ok(report)
    }
}

impl Harvester for HookHarvester {
    fn source(&self) -> HarvestSource {
        HarvestSource::Hook
    }

    async fn poll(
        &mut self,
        executor: &ScriptExecutor,
    ) -> Result<Vec<RawCandidateEvent>, DriverError> {
        if !self.installed {
            self.install(executor).await?;
        }
        let drained: Option<Vec<Map<String, Value>>> = executor
            .evaluate_as(self.drain_script.as_str(), EvalMode::Sync)
            .await?;
        let Some(records) = drained else {
            warn!(event = "hook_lost", session_id = %executor.session().id());
            self.installed = false;
            return Ok(Vec::new());
        };
        Ok(records
            .into_iter()
            .map(|fields| RawCandidateEvent::new(HarvestSource::Hook, fields))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_executor, FakeReply};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn install_failure_is_capability_unavailable() {
        let executor = scripted_executor(|_| {
            let report = json!({"installed": false, "message": "hook target not available"});
            FakeReply::Value(json!(report.to_string()))
        });
        let mut harvester = HookHarvester::with_scripts("install", "drain");
        let err = harvester.install(&executor).await.expect_err("install");
        assert_eq!(
            err,
            DriverError::CapabilityUnavailable("hook target not available".to_string())
        );
        assert!(!harvester.is_installed());
    }

    #[tokio::test]
    async fn drain_returns_records_and_reinstalls_after_loss() {
        let installs = Arc::new(AtomicUsize::new(0));
        let drains = Arc::new(AtomicUsize::new(0));
        let executor = {
            let installs = Arc::clone(&installs);
            let drains = Arc::clone(&drains);
            scripted_executor(move |payload| match payload {
                "install" => {
                    installs.fetch_add(1, Ordering::SeqCst);
                    FakeReply::Value(json!("{\"installed\":true,\"hookedEvents\":2}"))
                }
                _ => match drains.fetch_add(1, Ordering::SeqCst) {
                    0 => {
                        let records = json!([
                            {"time": 1, "from": "a", "text": "hi"},
                            {"time": 2, "from": "b", "text": "yo"}
                        ]);
                        FakeReply::Value(json!(records.to_string()))
                    }
                    1 => FakeReply::Value(json!("null")),
                    _ => FakeReply::Value(json!("[]")),
                },
            })
        };
        let mut harvester = HookHarvester::with_scripts("install", "drain");

        let batch = harvester.poll(&executor).await.expect("first poll");
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|raw| raw.source == HarvestSource::Hook));

        let batch = harvester.poll(&executor).await.expect("lost poll");
        assert!(batch.is_empty());
        assert!(!harvester.is_installed());

        harvester.poll(&executor).await.expect("third poll");
        assert_eq!(installs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remote_error_surfaces_from_poll() {
        let executor = scripted_executor(|payload| match payload {
            "install" => FakeReply::Value(json!({"installed": true})),
            _ => FakeReply::Error("page navigated".to_string()),
        });
        let mut harvester = HookHarvester::with_scripts("install", "drain");
        let err = harvester.poll(&executor).await.expect_err("drain error");
        assert!(err.is_remote());
    }
}
