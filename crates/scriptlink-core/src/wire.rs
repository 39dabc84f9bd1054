use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

use crate::error::DriverError;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const DEVTOOLS_EVALUATE: &str = "Runtime.evaluate";
const GENERIC_EVALUATE: &str = "evaluate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    #[default]
    Sync,
    AwaitAsync,
}

impl EvalMode {
    pub fn awaits_async(self) -> bool {
        matches!(self, EvalMode::AwaitAsync)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: u64,
    pub payload: String,
    pub await_async: bool,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    pub fn new(id: u64, payload: impl Into<String>, mode: EvalMode) -> Self {
        Self {
            id,
            payload: payload.into(),
            await_async: mode.awaits_async(),
            issued_at: Utc::now(),
        }
    }

    pub fn mode(&self) -> EvalMode {
        if self.await_async {
            EvalMode::AwaitAsync
        } else {
            EvalMode::Sync
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteFault>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Reply(ReplyFrame),
    Event(EventFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

impl From<FrameError> for DriverError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::OversizedFrame { .. } | FrameError::Encode(_) => {
                DriverError::Encode(err.to_string())
            }
            FrameError::Decode(_) => DriverError::Decode(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Devtools,
    Generic,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Devtools => "devtools",
            Dialect::Generic => "generic",
        }
    }

    pub fn encode_command(
        self,
        command: &Command,
        max_frame_bytes: usize,
    ) -> Result<String, FrameError> {
        let encoded = match self {
            Dialect::Devtools => serde_json::to_string(&DevtoolsCommand {
                id: command.id,
                method: DEVTOOLS_EVALUATE,
                params: DevtoolsEvaluateParams {
                    expression: &command.payload,
                    return_by_value: true,
                    await_promise: command.await_async,
                },
            }),
            Dialect::Generic => serde_json::to_string(&GenericCommand {
                id: command.id,
                kind: GENERIC_EVALUATE,
                payload: &command.payload,
                await_async: command.await_async,
            }),
        }
        .map_err(|err| FrameError::Encode(err.to_string()))?;
        if encoded.len() > max_frame_bytes {
            return Err(FrameError::OversizedFrame {
                size: encoded.len(),
                max: max_frame_bytes,
            });
        }
        Ok(encoded)
    }

    pub fn decode_inbound(
        self,
        text: &str,
        max_frame_bytes: usize,
    ) -> Result<InboundFrame, FrameError> {
        if text.len() > max_frame_bytes {
            return Err(FrameError::OversizedFrame {
                size: text.len(),
                max: max_frame_bytes,
            });
        }
        let raw: RawInbound =
            serde_json::from_str(text).map_err(|err| FrameError::Decode(err.to_string()))?;
        let Some(id) = raw.id else {
            return match raw.method {
                Some(method) => Ok(InboundFrame::Event(EventFrame {
                    method,
                    params: raw.params,
                })),
                None => Err(FrameError::Decode(
                    "frame has neither id nor method".to_string(),
                )),
            };
        };
        let reply = match self {
            Dialect::Devtools => devtools_reply(id, raw.result, raw.error),
            Dialect::Generic => ReplyFrame {
                id,
                result: raw.result,
                error: raw.error.map(fault_from_value),
            },
        };
        Ok(InboundFrame::Reply(reply))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "devtools" | "cdp" => Ok(Dialect::Devtools),
            "generic" => Ok(Dialect::Generic),
            other => Err(format!("Unknown dialect: {other}")),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DevtoolsCommand<'a> {
    id: u64,
    method: &'static str,
    params: DevtoolsEvaluateParams<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DevtoolsEvaluateParams<'a> {
    expression: &'a str,
    return_by_value: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    await_promise: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenericCommand<'a> {
    id: u64,
    kind: &'static str,
    payload: &'a str,
    await_async: bool,
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(default, deserialize_with = "deserialize_frame_id")]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn devtools_reply(id: u64, result: Option<Value>, error: Option<Value>) -> ReplyFrame {
    if let Some(error) = error {
        return ReplyFrame {
            id,
            result: None,
            error: Some(fault_from_value(error)),
        };
    }
    let Some(Value::Object(mut envelope)) = result else {
        return ReplyFrame {
            id,
            result: None,
            error: None,
        };
    };
    if let Some(details) = envelope.remove("exceptionDetails") {
        return ReplyFrame {
            id,
            result: None,
            error: Some(RemoteFault {
                message: exception_message(&details),
                code: None,
            }),
        };
    }
    let value = match envelope.remove("result") {
        Some(Value::Object(remote)) => remote_object_value(remote),
        _ => Value::Null,
    };
    ReplyFrame {
        id,
        result: Some(value),
        error: None,
    }
}

fn remote_object_value(mut remote: Map<String, Value>) -> Value {
    if remote.get("type").and_then(Value::as_str) == Some("undefined") {
        return Value::Null;
    }
    if let Some(value) = remote.remove("value") {
        return value;
    }
    for key in ["unserializableValue", "description"] {
        if let Some(Value::String(text)) = remote.remove(key) {
            return Value::String(text);
        }
    }
    Value::Null
}

fn exception_message(details: &Value) -> String {
    let description = details
        .get("exception")
        .and_then(|exception| exception.get("description"))
        .and_then(Value::as_str)
        .and_then(|text| text.lines().next())
        .map(str::trim)
        .filter(|line| !line.is_empty());
    if let Some(line) = description {
        return line.to_string();
    }
    details
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("remote exception")
        .to_string()
}

fn fault_from_value(value: Value) -> RemoteFault {
    match value {
        Value::String(message) => RemoteFault {
            message,
            code: None,
        },
        Value::Object(map) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string());
            RemoteFault {
                message,
                code: map.get("code").and_then(lenient_code),
            }
        }
        other => RemoteFault {
            message: other.to_string(),
            code: None,
        },
    }
}

pub fn lenient_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Best-effort correlation id of an inbound frame that failed to decode, so
/// the waiting command can fail at once instead of timing out.
pub fn reply_id_hint(text: &str) -> Option<u64> {
    #[derive(Deserialize)]
    struct IdOnly {
        #[serde(default, deserialize_with = "deserialize_frame_id")]
        id: Option<u64>,
    }

    if let Ok(frame) = serde_json::from_str::<IdOnly>(text) {
        return frame.id;
    }
    leading_id_regex()
        .captures(text)
        .and_then(|captures| captures.get(1)?.as_str().parse().ok())
}

fn leading_id_regex() -> &'static Regex {
    static LEADING_ID: OnceLock<Regex> = OnceLock::new();
    LEADING_ID.get_or_init(|| {
        Regex::new(r#"^\s*\{\s*"id"\s*:\s*"?(\d+)"#).expect("valid regex")
    })
}

fn deserialize_frame_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FrameIdVisitor;

    impl<'de> Visitor<'de> for FrameIdVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a frame id as string or integer")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Some)
                .map_err(|_| E::custom(format!("frame id out of range: {value}")))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid frame id: {value}")))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(FrameIdVisitor)
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
