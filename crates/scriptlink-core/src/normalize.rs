use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::config::DedupConfig;
use crate::dedup::{content_prefix, dedup_key};
use crate::event::{CanonicalEvent, Direction, EventKind, RawCandidateEvent, Scene};

const TIME_FIELDS: &[&str] = &["time", "timestamp"];
const FROM_FIELDS: &[&str] = &["from", "sender", "senderId"];
const TO_FIELDS: &[&str] = &["to", "target"];
const KIND_FIELDS: &[&str] = &["type", "kind"];
const TEXT_FIELDS: &[&str] = &["text", "content"];
const FLOW_FIELDS: &[&str] = &["flow", "direction"];
const ID_FIELDS: &[&str] = &["idClient", "id"];
const NAME_FIELDS: &[&str] = &["fromNick", "senderName", "nick"];

const TEAM_ID_MIN_LEN: usize = 10;

fn clock_time_regex() -> &'static Regex {
    static CLOCK: OnceLock<Regex> = OnceLock::new();
    CLOCK.get_or_init(|| {
        Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d):([0-5]\d)\b").expect("valid regex")
    })
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    prefix_chars: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&DedupConfig::default())
    }
}

impl Normalizer {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            prefix_chars: config.prefix_chars,
        }
    }

    pub fn normalize(&self, raw: &RawCandidateEvent) -> Option<CanonicalEvent> {
        let kind = EventKind::from_remote(&raw.text_field(KIND_FIELDS).unwrap_or_default());
        let text = if kind == EventKind::Custom {
            raw.text_field(&["text"]).unwrap_or_default()
        } else {
            raw.text_field(TEXT_FIELDS).unwrap_or_default()
        };
        if text.is_empty() && kind != EventKind::Custom {
            return None;
        }

        let from = raw.text_field(FROM_FIELDS).unwrap_or_default();
        let to = raw.text_field(TO_FIELDS).unwrap_or_default();
        let scene = match raw.text_field(&["scene"]).map(|scene| scene.to_lowercase()) {
            Some(scene) if scene == "team" || scene == "group" => Scene::Team,
            Some(_) => Scene::P2p,
            None if to.chars().count() > TEAM_ID_MIN_LEN => Scene::Team,
            None => Scene::P2p,
        };
        let outbound = raw
            .text_field(FLOW_FIELDS)
            .is_some_and(|flow| flow.eq_ignore_ascii_case("out"))
            || raw.bool_field("isSelf");
        let direction = if outbound { Direction::Out } else { Direction::In };

        // Without a remote timestamp the key uses 0 so repeated sightings of
        // the same entry agree; the event itself still carries capture time.
        let remote_time = self.remote_timestamp(raw, &text);
        let key_ms = remote_time.map(|at| at.timestamp_millis()).unwrap_or(0);
        let prefix = content_prefix(&text, &raw_content(raw), self.prefix_chars);

        Some(CanonicalEvent {
            dedup_key: dedup_key(key_ms, scene, &from, &to, &prefix),
            source: raw.source,
            scene,
            from,
            sender_name: raw.text_field(NAME_FIELDS),
            to,
            kind,
            text,
            direction,
            idempotent_id: raw.text_field(ID_FIELDS),
            timestamp: remote_time.unwrap_or(raw.captured_at),
        })
    }

    fn remote_timestamp(&self, raw: &RawCandidateEvent, text: &str) -> Option<DateTime<Utc>> {
        if let Some(millis) = raw.i64_field(TIME_FIELDS).filter(|millis| *millis > 0) {
            return DateTime::from_timestamp_millis(millis);
        }
        let time_text = raw.text_field(TIME_FIELDS).unwrap_or_default();
        clock_time(&time_text, raw.captured_at).or_else(|| clock_time(text, raw.captured_at))
    }
}

fn clock_time(text: &str, captured_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let captures = clock_time_regex().captures(text)?;
    let hour = captures.get(1)?.as_str().parse().ok()?;
    let minute = captures.get(2)?.as_str().parse().ok()?;
    let second = captures.get(3)?.as_str().parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let resolved = Utc.from_utc_datetime(&captured_at.date_naive().and_time(time));
    if resolved > captured_at {
        Some(resolved - Duration::days(1))
    } else {
        Some(resolved)
    }
}

fn raw_content(raw: &RawCandidateEvent) -> String {
    match raw.fields.get("content") {
        Some(Value::String(content)) => content.clone(),
        Some(other) => other.to_string(),
        None => Value::Object(raw.fields.clone()).to_string(),
    }
}
