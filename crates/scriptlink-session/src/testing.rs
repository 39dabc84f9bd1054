use scriptlink_core::{Dialect, DriverConfig};
use serde_json::{json, Value};

use crate::executor::ScriptExecutor;
use crate::session::Session;
use crate::transport::memory_link;

pub(crate) enum FakeReply {
    Value(Value),
    Error(String),
    Silent,
}

pub(crate) fn scripted_executor<F>(mut handler: F) -> ScriptExecutor
where
    F: FnMut(&str) -> FakeReply + Send + 'static,
{
    let (link, mut remote) = memory_link(16);
    let config = DriverConfig {
        dialect: Dialect::Generic,
        ..DriverConfig::default()
    };
    let session = Session::start(link, config);
    tokio::spawn(async move {
        while let Some(command) = remote.commands.recv().await {
            let Ok(frame) = serde_json::from_str::<Value>(&command) else {
                continue;
            };
            let payload = frame["payload"].as_str().unwrap_or_default().to_string();
            let reply = match handler(&payload) {
                FakeReply::Value(value) => json!({"id": frame["id"], "result": value}),
                FakeReply::Error(message) => json!({"id": frame["id"], "error": message}),
                FakeReply::Silent => continue,
            };
            if remote.replies.send(reply.to_string()).await.is_err() {
                break;
            }
        }
    });
    ScriptExecutor::new(session)
}
