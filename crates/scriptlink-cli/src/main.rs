mod logging;
mod watch;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use scriptlink_core::{
    Dialect, DriverConfig, EvalMode, HarvestConfig, RetryConfig, RetryOutcome,
};
use scriptlink_session::{execute, RetryPolicy, ScriptExecutor, Session, WsConnector};
use serde_json::{json, Value};
use std::{env, process::ExitCode};
use tokio::sync::watch as signal_watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "scriptlink")]
#[command(about = "Drive a remote script host over a persistent WebSocket", long_about = None)]
struct Args {
    /// WebSocket endpoint; falls back to SCRIPTLINK_URL.
    #[arg(long, default_value = "")]
    url: String,
    #[arg(long, default_value = "devtools")]
    dialect: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Evaluate one expression and print the decoded value as JSON
    Eval {
        #[arg(long)]
        await_async: bool,
        /// Treat the value as a mutation report and retry on rate limits
        #[arg(long)]
        retry: bool,
        expression: String,
    },
    /// Harvest events and stream them as NDJSON on stdout
    Watch {
        #[arg(long)]
        hook: bool,
        #[arg(long)]
        cursor: bool,
        #[arg(long)]
        snapshot: bool,
        #[arg(long)]
        target: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub connector: WsConnector,
    pub driver: DriverConfig,
    pub log_dir: String,
    pub log_label: String,
    pub log_stderr: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("scriptlink: {err:#}");
            return ExitCode::from(2);
        }
    };
    let _log_guard = logging::init_logging(&config.log_dir, &config.log_label, config.log_stderr);

    let (stop_tx, stop_rx) = signal_watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(event = "interrupt_received");
                let _ = stop_tx.send(true);
            }
            Err(err) => {
                warn!(event = "signal_handler_failed", error = %err);
                // Keep the sender alive so receivers never see a closed channel.
                std::future::pending::<()>().await;
            }
        }
    });

    let result = match args.command {
        Mode::Eval {
            await_async,
            retry,
            expression,
        } => {
            let mode = if await_async {
                EvalMode::AwaitAsync
            } else {
                EvalMode::Sync
            };
            run_eval(&config, expression, mode, retry, stop_rx).await
        }
        Mode::Watch {
            hook,
            cursor,
            snapshot,
            target,
        } => {
            let harvest = build_harvest_config(hook, cursor, snapshot, target);
            watch::run(&config, harvest, stop_rx).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "scriptlink_failed", error = %format!("{err:#}"));
            eprintln!("scriptlink: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<RuntimeConfig> {
    let url =
        resolve_url(&args.url).ok_or_else(|| anyhow!("missing --url (or SCRIPTLINK_URL)"))?;
    let dialect: Dialect = args.dialect.parse().map_err(|err: String| anyhow!(err))?;
    let driver = DriverConfig {
        dialect,
        ..DriverConfig::default()
    };
    driver.validate().context("invalid driver configuration")?;
    let connector = WsConnector::parse(&url)
        .context("invalid endpoint url")?
        .with_capacity(driver.outbound_capacity);
    Ok(RuntimeConfig {
        connector,
        driver,
        log_dir: resolve_log_dir(&args.log_dir),
        log_label: resolve_log_label(),
        log_stderr: resolve_log_stderr(),
    })
}

fn build_harvest_config(
    hook: bool,
    cursor: bool,
    snapshot: bool,
    target: Option<String>,
) -> HarvestConfig {
    let mut config = HarvestConfig {
        target,
        ..HarvestConfig::default()
    };
    // No flag keeps the defaults (hook only).
    if hook || cursor || snapshot {
        config.hook.enabled = hook;
        config.cursor.enabled = cursor;
        config.snapshot.enabled = snapshot;
    }
    config
}

async fn run_eval(
    config: &RuntimeConfig,
    expression: String,
    mode: EvalMode,
    retry: bool,
    mut stop: signal_watch::Receiver<bool>,
) -> Result<()> {
    let link = config.connector.connect().await.context("connect failed")?;
    let session = Session::start(link, config.driver.clone());
    let executor = ScriptExecutor::new(session.clone());

    let work = async {
        if retry {
            let policy = RetryPolicy::from_config(&RetryConfig::default());
            let outcome = execute(&executor.call(expression, mode), &policy).await;
            outcome_report(&outcome)
        } else {
            executor
                .evaluate(expression, mode)
                .await
                .context("evaluation failed")
        }
    };
    let value = tokio::select! {
        value = work => value,
        _ = stop.wait_for(|stopped| *stopped) => Err(anyhow!("interrupted")),
    };
    session.close();
    println!("{}", serde_json::to_string(&value?)?);
    Ok(())
}

fn outcome_report(outcome: &RetryOutcome<Value>) -> Result<Value> {
    if let Some(err) = outcome.error() {
        return Err(anyhow!(
            "{} after {} attempts: {err}",
            outcome.state().as_str(),
            outcome.attempts()
        ));
    }
    Ok(json!({
        "state": outcome.state().as_str(),
        "attempts": outcome.attempts(),
        "value": outcome.value(),
    }))
}

fn resolve_url(flag: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env::var("SCRIPTLINK_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.trim().to_string())
}

fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    env::var("SCRIPTLINK_LOG_DIR").unwrap_or_default()
}

fn resolve_log_label() -> String {
    if let Ok(value) = env::var("SCRIPTLINK_SESSION") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    format!("pid-{}", std::process::id())
}

fn resolve_log_stderr() -> bool {
    if let Ok(value) = env::var("SCRIPTLINK_LOG_STDERR") {
        match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => return true,
            "0" | "false" | "FALSE" | "no" | "NO" => return false,
            _ => {}
        }
    }
    false
}
