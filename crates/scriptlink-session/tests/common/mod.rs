#![allow(dead_code)]

use scriptlink_core::{Dialect, DriverConfig};
use scriptlink_session::{memory_link, RemoteEnd, ScriptExecutor, Session};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub fn generic_config() -> DriverConfig {
    DriverConfig {
        dialect: Dialect::Generic,
        ..DriverConfig::default()
    }
}

pub struct Received {
    pub id: Value,
    pub payload: String,
}

pub fn parse_command(text: &str) -> Received {
    let frame: Value = serde_json::from_str(text).expect("command json");
    Received {
        id: frame["id"].clone(),
        payload: frame["payload"].as_str().expect("payload").to_string(),
    }
}

pub fn value_reply(id: &Value, value: Value) -> String {
    json!({"id": id, "result": value}).to_string()
}

pub fn error_reply(id: &Value, message: &str) -> String {
    json!({"id": id, "error": {"message": message}}).to_string()
}

pub enum Answer {
    Value(Value),
    Error(String),
    Ignore,
}

pub fn fake_remote<F>(handler: F) -> (ScriptExecutor, mpsc::Sender<String>)
where
    F: FnMut(&str) -> Answer + Send + 'static,
{
    fake_remote_with(generic_config(), handler)
}

pub fn fake_remote_with<F>(
    config: DriverConfig,
    mut handler: F,
) -> (ScriptExecutor, mpsc::Sender<String>)
where
    F: FnMut(&str) -> Answer + Send + 'static,
{
    let (link, remote) = memory_link(64);
    let session = Session::start(link, config);
    let RemoteEnd {
        mut commands,
        replies,
    } = remote;
    let injector = replies.clone();
    tokio::spawn(async move {
        while let Some(text) = commands.recv().await {
            let command = parse_command(&text);
            let reply = match handler(&command.payload) {
                Answer::Value(value) => value_reply(&command.id, value),
                Answer::Error(message) => error_reply(&command.id, &message),
                Answer::Ignore => continue,
            };
            if replies.send(reply).await.is_err() {
                break;
            }
        }
    });
    (ScriptExecutor::new(session), injector)
}
