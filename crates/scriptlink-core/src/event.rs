use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestSource {
    Hook,
    CursorScan,
    Snapshot,
}

impl HarvestSource {
    pub fn as_str(self) -> &'static str {
        match self {
            HarvestSource::Hook => "hook",
            HarvestSource::CursorScan => "cursor_scan",
            HarvestSource::Snapshot => "snapshot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scene {
    P2p,
    Team,
}

impl Scene {
    pub fn as_str(self) -> &'static str {
        match self {
            Scene::P2p => "p2p",
            Scene::Team => "team",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Text,
    Image,
    Custom,
    System,
}

impl EventKind {
    pub fn from_remote(kind: &str) -> Self {
        match kind.trim().to_lowercase().as_str() {
            "" | "text" => EventKind::Text,
            "image" | "picture" => EventKind::Image,
            "custom" | "emoji" | "sticker" => EventKind::Custom,
            _ => EventKind::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidateEvent {
    pub source: HarvestSource,
    pub fields: Map<String, Value>,
    pub captured_at: DateTime<Utc>,
}

impl RawCandidateEvent {
    pub fn new(source: HarvestSource, fields: Map<String, Value>) -> Self {
        Self {
            source,
            fields,
            captured_at: Utc::now(),
        }
    }

    pub fn text_field(&self, aliases: &[&str]) -> Option<String> {
        aliases.iter().find_map(|key| match self.fields.get(*key) {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Some(Value::Number(number)) => Some(number.to_string()),
            _ => None,
        })
    }

    pub fn i64_field(&self, aliases: &[&str]) -> Option<i64> {
        aliases.iter().find_map(|key| match self.fields.get(*key) {
            Some(Value::Number(number)) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64)),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn bool_field(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub dedup_key: String,
    pub source: HarvestSource,
    pub scene: Scene,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub to: String,
    pub kind: EventKind,
    pub text: String,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}
