use scriptlink_core::{CallSite, DriverError, RetryConfig, RetryOutcome, RetryState};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::executor::RemoteCall;

pub type RetryPredicate = Arc<dyn Fn(&DriverError) -> bool + Send + Sync>;

pub struct RetryPolicy<T> {
    delay_schedule: Vec<Duration>,
    retryable: RetryPredicate,
    fallbacks: Vec<RemoteCall<T>>,
}

impl<T> Clone for RetryPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            delay_schedule: self.delay_schedule.clone(),
            retryable: Arc::clone(&self.retryable),
            fallbacks: self.fallbacks.clone(),
        }
    }
}

impl<T> RetryPolicy<T> {
    pub fn new(delay_schedule: Vec<Duration>) -> Self {
        Self {
            delay_schedule,
            retryable: Arc::new(DriverError::is_rate_limited),
            fallbacks: Vec::new(),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.delay_schedule())
    }

    pub fn with_retryable<F>(mut self, retryable: F) -> Self
    where
        F: Fn(&DriverError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(retryable);
        self
    }

    pub fn with_fallback(mut self, fallback: RemoteCall<T>) -> Self {
        self.fallbacks.push(fallback);
        self
    }

    pub fn delay_schedule(&self) -> &[Duration] {
        &self.delay_schedule
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }

    pub fn is_retryable(&self, err: &DriverError) -> bool {
        (self.retryable)(err)
    }
}

pub struct ConfirmationSpec<S> {
    pub check: RemoteCall<S>,
    pub predicate: Arc<dyn Fn(&S) -> bool + Send + Sync>,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl<S> Clone for ConfirmationSpec<S> {
    fn clone(&self) -> Self {
        Self {
            check: Arc::clone(&self.check),
            predicate: Arc::clone(&self.predicate),
            poll_interval: self.poll_interval,
            max_polls: self.max_polls,
        }
    }
}

impl<S> ConfirmationSpec<S> {
    pub fn new<P>(
        check: RemoteCall<S>,
        predicate: P,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Self {
            check,
            predicate: Arc::new(predicate),
            poll_interval,
            max_polls,
        }
    }

    pub fn from_config<P>(check: RemoteCall<S>, predicate: P, config: &RetryConfig) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Self::new(
            check,
            predicate,
            config.confirm_poll_interval(),
            config.confirm_max_polls,
        )
    }
}

fn transition(state: RetryState, attempt: u32) {
    debug!(event = "retry_transition", state = state.as_str(), attempt);
}

pub async fn execute<T>(call: &RemoteCall<T>, policy: &RetryPolicy<T>) -> RetryOutcome<T> {
    execute_with::<T, ()>(call, policy, None).await
}

pub async fn execute_with<T, S>(
    call: &RemoteCall<T>,
    policy: &RetryPolicy<T>,
    confirmation: Option<&ConfirmationSpec<S>>,
) -> RetryOutcome<T> {
    let mut attempts = 0u32;
    let mut last_error = None;

    for (index, delay) in policy.delay_schedule.iter().enumerate() {
        if index > 0 {
            transition(RetryState::Retrying, attempts);
            tokio::time::sleep(*delay).await;
        }
        attempts += 1;
        transition(RetryState::Attempting, attempts);
        match call().await {
            Ok(value) => return confirm(value, attempts, CallSite::Primary, confirmation).await,
            Err(err) if !policy.is_retryable(&err) => {
                transition(RetryState::Rejected, attempts);
                return RetryOutcome::Rejected {
                    error: err,
                    attempts,
                };
            }
            Err(err) => last_error = Some(err),
        }
    }

    for (index, fallback) in policy.fallbacks.iter().enumerate() {
        attempts += 1;
        transition(RetryState::FallbackAttempting, attempts);
        match fallback().await {
            Ok(value) => {
                return confirm(value, attempts, CallSite::Fallback(index), confirmation).await;
            }
            Err(err) => last_error = Some(err),
        }
    }

    transition(RetryState::ExhaustedFailed, attempts);
    RetryOutcome::ExhaustedFailed {
        last_error: last_error.unwrap_or_else(|| DriverError::RemoteEvaluation {
            message: "no attempt was scheduled".to_string(),
            code: None,
        }),
        attempts,
    }
}

async fn confirm<T, S>(
    value: T,
    attempts: u32,
    via: CallSite,
    confirmation: Option<&ConfirmationSpec<S>>,
) -> RetryOutcome<T> {
    let Some(spec) = confirmation else {
        transition(RetryState::Succeeded, attempts);
        return RetryOutcome::Succeeded {
            value,
            attempts,
            via,
        };
    };
    transition(RetryState::Confirming, attempts);
    for poll in 1..=spec.max_polls {
        match (spec.check)().await {
            Ok(state) if (spec.predicate)(&state) => {
                transition(RetryState::Confirmed, attempts);
                return RetryOutcome::Confirmed {
                    value,
                    attempts,
                    via,
                    polls: poll,
                };
            }
            Ok(_) => {}
            Err(err) => debug!(event = "retry_confirm_check_failed", poll, error = %err),
        }
        if poll < spec.max_polls {
            tokio::time::sleep(spec.poll_interval).await;
        }
    }
    transition(RetryState::UnconfirmedAccepted, attempts);
    RetryOutcome::UnconfirmedAccepted {
        value,
        attempts,
        via,
        polls: spec.max_polls,
    }
}
