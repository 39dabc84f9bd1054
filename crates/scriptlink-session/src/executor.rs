use futures_util::future::BoxFuture;
use scriptlink_core::wire::lenient_code;
use scriptlink_core::{DriverError, ErrorClassifier, EvalMode, ReplyFrame};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::session::Session;

pub type RemoteCall<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, DriverError>> + Send + Sync>;

pub fn remote_call<T, F, Fut>(call: F) -> RemoteCall<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, DriverError>> + Send + 'static,
{
    Arc::new(move || Box::pin(call()))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
}

impl RemoteOutcome {
    pub fn code(&self) -> Option<i64> {
        self.code.as_ref().and_then(lenient_code)
    }

    pub fn into_error(self, classifier: &ErrorClassifier) -> DriverError {
        let code = self.code();
        let message = self
            .error
            .or(self.message)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| match code {
                Some(code) => format!("remote reported failure (code {code})"),
                None => "remote reported failure".to_string(),
            });
        classifier.classify(&message, code)
    }
}

#[derive(Clone)]
pub struct ScriptExecutor {
    session: Session,
    classifier: ErrorClassifier,
}

impl ScriptExecutor {
    pub fn new(session: Session) -> Self {
        let classifier = session.config().classifier.clone();
        Self {
            session,
            classifier,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub async fn evaluate(
        &self,
        expression: impl Into<String>,
        mode: EvalMode,
    ) -> Result<Value, DriverError> {
        let reply = self.session.submit(expression, mode).await?;
        self.decode_reply(reply)
    }

    pub fn decode_reply(&self, reply: ReplyFrame) -> Result<Value, DriverError> {
        if let Some(fault) = reply.error {
            return Err(self.classifier.classify(&fault.message, fault.code));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    pub async fn evaluate_as<T: DeserializeOwned>(
        &self,
        expression: impl Into<String>,
        mode: EvalMode,
    ) -> Result<T, DriverError> {
        decode_value(self.evaluate(expression, mode).await?)
    }

    pub async fn evaluate_outcome(
        &self,
        expression: impl Into<String>,
        mode: EvalMode,
    ) -> Result<Value, DriverError> {
        let value = parse_json_string(self.evaluate(expression, mode).await?);
        let outcome: RemoteOutcome = serde_json::from_value(value.clone())
            .map_err(|err| DriverError::Decode(format!("outcome report: {err}")))?;
        if outcome.success {
            return Ok(value);
        }
        Err(outcome.into_error(&self.classifier))
    }

    pub fn call(&self, expression: impl Into<String>, mode: EvalMode) -> RemoteCall<Value> {
        let executor = self.clone();
        let expression: Arc<str> = Arc::from(expression.into());
        remote_call(move || {
            let executor = executor.clone();
            let expression = Arc::clone(&expression);
            async move { executor.evaluate_outcome(expression.as_ref(), mode).await }
        })
    }
}

pub fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, DriverError> {
    if let Value::String(text) = &value {
        if let Ok(parsed) = serde_json::from_str::<T>(text) {
            return Ok(parsed);
        }
    }
    serde_json::from_value(value).map_err(|err| DriverError::Decode(err.to_string()))
}

fn parse_json_string(value: Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}
