use serde::Serialize;

use crate::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    Primary,
    Fallback(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Attempting,
    Retrying,
    FallbackAttempting,
    Succeeded,
    Confirming,
    Confirmed,
    UnconfirmedAccepted,
    ExhaustedFailed,
    Rejected,
}

impl RetryState {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryState::Attempting => "attempting",
            RetryState::Retrying => "retrying",
            RetryState::FallbackAttempting => "fallback_attempting",
            RetryState::Succeeded => "succeeded",
            RetryState::Confirming => "confirming",
            RetryState::Confirmed => "confirmed",
            RetryState::UnconfirmedAccepted => "unconfirmed_accepted",
            RetryState::ExhaustedFailed => "exhausted_failed",
            RetryState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32, via: CallSite },
    Confirmed {
        value: T,
        attempts: u32,
        via: CallSite,
        polls: u32,
    },
    UnconfirmedAccepted {
        value: T,
        attempts: u32,
        via: CallSite,
        polls: u32,
    },
    ExhaustedFailed { last_error: DriverError, attempts: u32 },
    Rejected { error: DriverError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn state(&self) -> RetryState {
        match self {
            RetryOutcome::Succeeded { .. } => RetryState::Succeeded,
            RetryOutcome::Confirmed { .. } => RetryState::Confirmed,
            RetryOutcome::UnconfirmedAccepted { .. } => RetryState::UnconfirmedAccepted,
            RetryOutcome::ExhaustedFailed { .. } => RetryState::ExhaustedFailed,
            RetryOutcome::Rejected { .. } => RetryState::Rejected,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Confirmed { attempts, .. }
            | RetryOutcome::UnconfirmedAccepted { attempts, .. }
            | RetryOutcome::ExhaustedFailed { attempts, .. }
            | RetryOutcome::Rejected { attempts, .. } => *attempts,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, RetryOutcome::Confirmed { .. })
    }

    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            RetryOutcome::Succeeded { .. }
                | RetryOutcome::Confirmed { .. }
                | RetryOutcome::UnconfirmedAccepted { .. }
        )
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            RetryOutcome::Succeeded { value, .. }
            | RetryOutcome::Confirmed { value, .. }
            | RetryOutcome::UnconfirmedAccepted { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn via(&self) -> Option<CallSite> {
        match self {
            RetryOutcome::Succeeded { via, .. }
            | RetryOutcome::Confirmed { via, .. }
            | RetryOutcome::UnconfirmedAccepted { via, .. } => Some(*via),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DriverError> {
        match self {
            RetryOutcome::ExhaustedFailed { last_error, .. } => Some(last_error),
            RetryOutcome::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }
}
