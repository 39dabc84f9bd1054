use scriptlink_core::{Command, DriverError, EvalMode, ReplyFrame};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

pub type Completion = oneshot::Sender<Result<ReplyFrame, DriverError>>;

#[derive(Debug)]
pub struct PendingRequest {
    pub id: u64,
    pub completion: Completion,
    pub deadline: Instant,
}

/// Ids come from a process-local counter and are never reused. The pending
/// map lock is never held across an await.
#[derive(Debug, Default)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_command(&self, payload: impl Into<String>, mode: EvalMode) -> Command {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Command::new(id, payload, mode)
    }

    pub async fn submit<F, Fut>(
        &self,
        command: &Command,
        timeout: Duration,
        send: F,
    ) -> Result<ReplyFrame, DriverError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), DriverError>>,
    {
        let id = command.id;
        let (completion, receiver) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.lock().insert(
            id,
            PendingRequest {
                id,
                completion,
                deadline,
            },
        );
        let registration = Registration {
            correlator: self,
            id,
        };

        if let Err(err) = send().await {
            drop(registration);
            return Err(err);
        }

        let mut receiver = receiver;
        match tokio::time::timeout_at(deadline, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DriverError::TransportClosed),
            Err(_) => {
                if self.lock().remove(&id).is_some() {
                    debug!(event = "command_timeout", id, after_ms = timeout.as_millis() as u64);
                    return Err(DriverError::Timeout { id, after: timeout });
                }
                // Resolved between the deadline firing and the removal.
                match receiver.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::Timeout { id, after: timeout }),
                }
            }
        }
    }

    pub fn resolve(&self, reply: ReplyFrame) -> bool {
        let id = reply.id;
        let Some(pending) = self.lock().remove(&id) else {
            return false;
        };
        if pending.completion.send(Ok(reply)).is_err() {
            debug!(event = "command_caller_gone", id);
        }
        true
    }

    pub fn fail(&self, id: u64, err: DriverError) -> bool {
        let Some(pending) = self.lock().remove(&id) else {
            return false;
        };
        let _ = pending.completion.send(Err(err));
        true
    }

    pub fn fail_all(&self, err: DriverError) -> usize {
        let drained: Vec<PendingRequest> =
            self.lock().drain().map(|(_, pending)| pending).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.completion.send(Err(err.clone()));
        }
        count
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Registration<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.correlator.forget(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn reply(id: u64, value: serde_json::Value) -> ReplyFrame {
        ReplyFrame {
            id,
            result: Some(value),
            error: None,
        }
    }

    #[test]
    fn ids_increase_monotonically() {
        let correlator = Correlator::new();
        let a = correlator.next_command("a", EvalMode::Sync);
        let b = correlator.next_command("b", EvalMode::AwaitAsync);
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(b.await_async);
    }

    #[tokio::test]
    async fn reply_resolves_only_its_caller() {
        let correlator = Arc::new(Correlator::new());
        let command = correlator.next_command("x", EvalMode::Sync);
        let waiter = {
            let correlator = Arc::clone(&correlator);
            let command = command.clone();
            tokio::spawn(async move {
                correlator
                    .submit(&command, Duration::from_secs(5), || async { Ok(()) })
                    .await
            })
        };
        while correlator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!correlator.resolve(reply(command.id + 100, json!("other"))));
        assert!(correlator.resolve(reply(command.id, json!("mine"))));
        let result = waiter.await.expect("join").expect("reply");
        assert_eq!(result.result, Some(json!("mine")));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn failed_send_removes_registration() {
        let correlator = Correlator::new();
        let command = correlator.next_command("x", EvalMode::Sync);
        let result = correlator
            .submit(&command, Duration::from_secs(5), || async {
                Err(DriverError::TransportClosed)
            })
            .await;
        assert_eq!(result, Err(DriverError::TransportClosed));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_yields_timeout_and_late_reply_is_unknown() {
        let correlator = Correlator::new();
        let command = correlator.next_command("x", EvalMode::Sync);
        let result = correlator
            .submit(&command, Duration::from_millis(200), || async { Ok(()) })
            .await;
        assert_eq!(
            result,
            Err(DriverError::Timeout {
                id: command.id,
                after: Duration::from_millis(200),
            })
        );
        assert!(!correlator.resolve(reply(command.id, json!(1))));
    }

    #[tokio::test]
    async fn cancelled_caller_leaves_no_entry() {
        let correlator = Correlator::new();
        let command = correlator.next_command("x", EvalMode::Sync);
        let submit = correlator.submit(&command, Duration::from_secs(5), || async { Ok(()) });
        let _ = tokio::time::timeout(Duration::from_millis(10), submit).await;
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn fail_completes_only_the_named_waiter() {
        let correlator = Arc::new(Correlator::new());
        let command = correlator.next_command("x", EvalMode::Sync);
        let waiter = {
            let correlator = Arc::clone(&correlator);
            let command = command.clone();
            tokio::spawn(async move {
                correlator
                    .submit(&command, Duration::from_secs(5), || async { Ok(()) })
                    .await
            })
        };
        while correlator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let err = DriverError::Decode("bad frame".to_string());
        assert!(!correlator.fail(command.id + 1, err.clone()));
        assert!(correlator.fail(command.id, err.clone()));
        assert_eq!(waiter.await.expect("join"), Err(err));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn fail_all_completes_every_waiter() {
        let correlator = Arc::new(Correlator::new());
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let correlator = Arc::clone(&correlator);
            waiters.push(tokio::spawn(async move {
                let command = correlator.next_command("x", EvalMode::AwaitAsync);
                correlator
                    .submit(&command, Duration::from_secs(60), || async { Ok(()) })
                    .await
            }));
        }
        while correlator.in_flight() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(correlator.fail_all(DriverError::TransportClosed), 3);
        for waiter in waiters {
            assert_eq!(waiter.await.expect("join"), Err(DriverError::TransportClosed));
        }
    }
}
