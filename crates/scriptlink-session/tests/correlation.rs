mod common;

use common::{generic_config, parse_command, value_reply};
use scriptlink_core::{DriverError, EvalMode};
use scriptlink_session::{memory_link, ScriptExecutor, Session};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_commands_receive_only_their_own_replies() {
    let (link, mut remote) = memory_link(64);
    let session = Session::start(link, generic_config());
    let executor = ScriptExecutor::new(session.clone());

    let responder = tokio::spawn(async move {
        let mut received = Vec::new();
        while received.len() < 50 {
            let text = remote.commands.recv().await.expect("command");
            received.push(parse_command(&text));
        }
        let mut sends = Vec::new();
        for (index, command) in received.into_iter().enumerate() {
            let replies = remote.replies.clone();
            let delay = Duration::from_millis(((index * 37) % 50) as u64);
            sends.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let reply = value_reply(&command.id, json!(format!("echo:{}", command.payload)));
                replies.send(reply.clone()).await.expect("reply");
                if index % 7 == 0 {
                    // Duplicate delivery must not reach anyone.
                    replies.send(reply).await.expect("duplicate");
                }
            }));
        }
        for send in sends {
            send.await.expect("send task");
        }
        remote
    });

    let mut callers = Vec::new();
    for index in 0..50 {
        let executor = executor.clone();
        callers.push(tokio::spawn(async move {
            let value = executor
                .evaluate(format!("payload-{index}"), EvalMode::Sync)
                .await;
            (index, value)
        }));
    }
    for caller in callers {
        let (index, value) = caller.await.expect("caller");
        assert_eq!(value.expect("reply"), json!(format!("echo:payload-{index}")));
    }
    let _remote = responder.await.expect("responder");
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_of_one_command_does_not_disturb_others() {
    let (link, mut remote) = memory_link(64);
    let session = Session::start(link, generic_config());
    let executor = ScriptExecutor::new(session.clone());

    let responder = tokio::spawn(async move {
        let mut slow_id = None;
        while let Some(text) = remote.commands.recv().await {
            let command = parse_command(&text);
            if command.payload == "slow" {
                slow_id = Some(command.id);
                continue;
            }
            if command.payload == "after-timeout" {
                // The late reply for the timed-out command arrives first.
                if let Some(id) = slow_id.take() {
                    remote
                        .replies
                        .send(value_reply(&id, json!("late")))
                        .await
                        .expect("late reply");
                }
            }
            remote
                .replies
                .send(value_reply(&command.id, json!(command.payload)))
                .await
                .expect("reply");
        }
    });

    let started = Instant::now();
    let slow = {
        let executor = executor.clone();
        tokio::spawn(async move {
            let result = executor.evaluate("slow", EvalMode::Sync).await;
            (result, started.elapsed())
        })
    };
    let fast = executor.evaluate("fast", EvalMode::Sync).await;
    assert_eq!(fast, Ok(json!("fast")));
    assert!(started.elapsed() < Duration::from_millis(10));
    assert!(!slow.is_finished());
    assert_eq!(session.in_flight(), 1);

    let (slow, slow_elapsed) = slow.await.expect("slow task");
    assert!(matches!(
        slow,
        Err(DriverError::Timeout { after, .. }) if after == Duration::from_secs(15)
    ));
    assert!(slow_elapsed >= Duration::from_secs(15));
    assert!(slow_elapsed < Duration::from_secs(15) + Duration::from_millis(10));
    assert_eq!(session.in_flight(), 0);

    let next = executor.evaluate("after-timeout", EvalMode::Sync).await;
    assert_eq!(next, Ok(json!("after-timeout")));
    assert!(session.is_alive());

    session.close();
    responder.abort();
}

#[tokio::test]
async fn closing_fails_every_pending_command_at_once() {
    let (link, _remote) = memory_link(64);
    let session = Session::start(link, generic_config());
    let executor = ScriptExecutor::new(session.clone());

    let mut pending = Vec::new();
    for index in 0..5 {
        let executor = executor.clone();
        pending.push(tokio::spawn(async move {
            executor
                .evaluate(format!("never-{index}"), EvalMode::AwaitAsync)
                .await
        }));
    }
    while session.in_flight() < 5 {
        tokio::task::yield_now().await;
    }

    let started = std::time::Instant::now();
    session.close();
    for task in pending {
        assert_eq!(task.await.expect("join"), Err(DriverError::TransportClosed));
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        executor.evaluate("after", EvalMode::Sync).await,
        Err(DriverError::TransportClosed)
    );
}

#[tokio::test]
async fn remote_error_reply_is_classified() {
    let (executor, _injector) = common::fake_remote(|payload| match payload {
        "send" => common::Answer::Error("发送频率过快".to_string()),
        "missing" => {
            common::Answer::Error("TypeError: nim.sendX is not a function".to_string())
        }
        _ => common::Answer::Error("member not in team".to_string()),
    });
    assert!(executor
        .evaluate("send", EvalMode::Sync)
        .await
        .expect_err("rate limit")
        .is_rate_limited());
    assert!(matches!(
        executor.evaluate("missing", EvalMode::Sync).await,
        Err(DriverError::CapabilityUnavailable(_))
    ));
    assert!(matches!(
        executor.evaluate("other", EvalMode::Sync).await,
        Err(DriverError::RemoteEvaluation { .. })
    ));
}
