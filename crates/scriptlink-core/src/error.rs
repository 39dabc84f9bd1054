use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("remote capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("command {id} timed out after {}ms", .after.as_millis())]
    Timeout { id: u64, after: Duration },
    #[error("transport closed")]
    TransportClosed,
    #[error("remote evaluation failed: {message}")]
    RemoteEvaluation { message: String, code: Option<i64> },
    #[error("remote rate limited: {message}")]
    RateLimited { message: String, code: Option<i64> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("command encode failed: {0}")]
    Encode(String),
    #[error("reply decode failed: {0}")]
    Decode(String),
}

impl DriverError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            DriverError::RemoteEvaluation { .. } | DriverError::RateLimited { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DriverError::RateLimited { .. })
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            DriverError::RemoteEvaluation { code, .. } | DriverError::RateLimited { code, .. } => {
                *code
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::CapabilityUnavailable(_) => "capability_unavailable",
            DriverError::Timeout { .. } => "timeout",
            DriverError::TransportClosed => "transport_closed",
            DriverError::RemoteEvaluation { .. } => "remote_evaluation",
            DriverError::RateLimited { .. } => "rate_limited",
            DriverError::Transport(_) => "transport",
            DriverError::Encode(_) => "encode",
            DriverError::Decode(_) => "decode",
        }
    }
}

/// Marker matching is case-insensitive substring matching. Rate-limit signals
/// win over capability markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorClassifier {
    pub rate_limit_codes: Vec<i64>,
    pub rate_limit_markers: Vec<String>,
    pub capability_markers: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            rate_limit_codes: vec![416],
            rate_limit_markers: vec![
                "rate limit".to_string(),
                "too frequent".to_string(),
                "频率".to_string(),
            ],
            capability_markers: vec![
                "is not a function".to_string(),
                "is not defined".to_string(),
                "not available".to_string(),
                "cannot read properties of undefined".to_string(),
            ],
        }
    }
}

impl ErrorClassifier {
    pub fn classify(&self, message: &str, code: Option<i64>) -> DriverError {
        if self.is_rate_limit(message, code) {
            return DriverError::RateLimited {
                message: message.to_string(),
                code,
            };
        }
        if contains_any(message, &self.capability_markers) {
            return DriverError::CapabilityUnavailable(message.to_string());
        }
        DriverError::RemoteEvaluation {
            message: message.to_string(),
            code,
        }
    }

    pub fn is_rate_limit(&self, message: &str, code: Option<i64>) -> bool {
        if code.is_some_and(|code| self.rate_limit_codes.contains(&code)) {
            return true;
        }
        contains_any(message, &self.rate_limit_markers)
    }
}

fn contains_any(message: &str, markers: &[String]) -> bool {
    let lowered = message.to_lowercase();
    markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_code_wins_over_message() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify("send failed", Some(416));
        assert!(err.is_rate_limited());
        assert!(err.is_remote());
        assert_eq!(err.code(), Some(416));
    }

    #[test]
    fn rate_limit_markers_match_case_insensitively() {
        let classifier = ErrorClassifier::default();
        assert!(classifier
            .classify("Rate Limit exceeded", None)
            .is_rate_limited());
        assert!(classifier.classify("操作频率过快", None).is_rate_limited());
        assert!(classifier
            .classify("request TOO FREQUENT", Some(500))
            .is_rate_limited());
    }

    #[test]
    fn missing_function_is_capability_unavailable() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify("TypeError: window.nim.sendText is not a function", None);
        assert_eq!(err.kind(), "capability_unavailable");
        assert!(!err.is_remote());

        let err = classifier.classify(
            "TypeError: Cannot read properties of undefined (reading 'team')",
            None,
        );
        assert!(matches!(err, DriverError::CapabilityUnavailable(_)));
    }

    #[test]
    fn plain_failures_are_remote_evaluation() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify("member not in team", Some(804));
        assert_eq!(
            err,
            DriverError::RemoteEvaluation {
                message: "member not in team".to_string(),
                code: Some(804),
            }
        );
    }

    #[test]
    fn timeout_message_reports_millis() {
        let err = DriverError::Timeout {
            id: 7,
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "command 7 timed out after 1500ms");
    }
}
