use futures_util::{SinkExt, StreamExt};
use scriptlink_core::{DriverConfig, DriverError, EvalMode};
use scriptlink_session::{ScriptExecutor, Session, WsConnector};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn devtools_page(listener: TcpListener) {
    let (stream, _) = listener.accept().await.expect("accept");
    let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
    let mut hangs = 0;
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let command: Value = serde_json::from_str(&text).expect("command");
        assert_eq!(command["method"], json!("Runtime.evaluate"));
        let id = command["id"].clone();
        let expression = command["params"]["expression"].as_str().unwrap_or_default();
        let reply = match expression {
            "1 + 1" => json!({"id": id, "result": {"result": {"type": "number", "value": 2}}}),
            "void 0" => json!({"id": id, "result": {"result": {"type": "undefined"}}}),
            "nim.sendX()" => json!({
                "id": id,
                "result": {
                    "result": {"type": "object", "subtype": "error"},
                    "exceptionDetails": {
                        "text": "Uncaught",
                        "exception": {
                            "description":
                                "TypeError: nim.sendX is not a function\n    at <anonymous>:1:5"
                        }
                    }
                }
            }),
            "hang()" => {
                hangs += 1;
                if hangs > 1 {
                    let _ = ws.close(None).await;
                    return;
                }
                continue;
            }
            _ => json!({"id": id, "error": {"code": -32000, "message": "unsupported"}}),
        };
        // Unsolicited events are interleaved with replies.
        let event = json!({"method": "Runtime.consoleAPICalled", "params": {"type": "log"}});
        ws.send(Message::Text(event.to_string())).await.expect("event");
        ws.send(Message::Text(reply.to_string())).await.expect("reply");
    }
}

async fn connect() -> ScriptExecutor {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(devtools_page(listener));
    let link = WsConnector::parse(&format!("ws://{addr}/devtools/page/1"))
        .expect("url")
        .connect()
        .await
        .expect("connect");
    ScriptExecutor::new(Session::start(link, DriverConfig::default()))
}

#[tokio::test]
async fn evaluates_over_websocket() {
    let executor = connect().await;
    let mut frames = executor.session().subscribe_frames();

    assert_eq!(executor.evaluate("1 + 1", EvalMode::Sync).await, Ok(json!(2)));
    assert_eq!(executor.evaluate("void 0", EvalMode::Sync).await, Ok(Value::Null));
    assert!(frames.recv().await.is_ok());

    let err = executor
        .evaluate("nim.sendX()", EvalMode::Sync)
        .await
        .expect_err("exception");
    assert_eq!(
        err,
        DriverError::CapabilityUnavailable("TypeError: nim.sendX is not a function".to_string())
    );
    let err = executor
        .evaluate("other()", EvalMode::Sync)
        .await
        .expect_err("protocol error");
    assert_eq!(err.code(), Some(-32000));
    executor.session().close();
}

#[tokio::test]
async fn socket_close_fails_pending_commands() {
    let executor = connect().await;
    let pending = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.evaluate("hang()", EvalMode::AwaitAsync).await })
    };
    while executor.session().in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    let second = executor.evaluate("hang()", EvalMode::AwaitAsync).await;
    assert_eq!(second, Err(DriverError::TransportClosed));
    assert_eq!(pending.await.expect("join"), Err(DriverError::TransportClosed));
    executor.session().closed().await;
    assert!(!executor.session().is_alive());
}

#[test]
fn rejects_non_websocket_urls() {
    let err = WsConnector::parse("http://127.0.0.1:9222").expect_err("scheme");
    assert_eq!(err.kind(), "transport");
}
