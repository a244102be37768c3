//! Stdio entry point: JSONL commands in, JSONL responses and events out.
//! Logs go to stderr so stdout stays a clean protocol stream.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    serde_json::{Map, Value},
    soulpilot_bridge::{Bridge, Command, CommandResponse},
    soulpilot_session::{
        CdpDriverFactory, EventConsumerFn, HealthConfig, SessionConfig, SessionSupervisor,
    },
    soulpilot_workflow::{FileStore, RunnerConfig, WorkflowRunner},
    tokio::io::AsyncBufReadExt,
    tracing::{error, info, warn},
    tracing_subscriber::EnvFilter,
};

#[derive(serde::Deserialize)]
struct Envelope {
    /// Correlation id echoed back on the response, opaque to the bridge.
    #[serde(default)]
    id: Option<Value>,
    #[serde(flatten)]
    command: Command,
}

fn tagged(kind: &str, id: Option<Value>, body: Value) -> Value {
    let mut object = match body {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    object.insert("type".to_string(), Value::String(kind.to_string()));
    if let Some(id) = id {
        object.insert("id".to_string(), id);
    }
    Value::Object(object)
}

fn print_line(value: &Value) {
    println!("{value}");
}

fn emit_response(id: Option<Value>, response: &CommandResponse) {
    match serde_json::to_value(response) {
        Ok(body) => print_line(&tagged("response", id, body)),
        Err(e) => error!(error = %e, "response serialization failed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let store_path = FileStore::default_path();
    let store = Arc::new(FileStore::open(&store_path).await.with_context(|| {
        format!("opening workflow store at {}", store_path.display())
    })?);
    info!(path = %store_path.display(), "workflow store ready");

    let supervisor = SessionSupervisor::new(
        Arc::new(CdpDriverFactory::new()),
        SessionConfig::default(),
        HealthConfig::default(),
    );

    let consumer: EventConsumerFn = Arc::new(|event| match serde_json::to_value(&event) {
        Ok(body) => print_line(&tagged("event", None, body)),
        Err(e) => warn!(error = %e, "event serialization failed"),
    });

    let bridge = Bridge::new(
        supervisor,
        store,
        WorkflowRunner::new(RunnerConfig::default()),
        consumer,
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => {
                let response = bridge.dispatch(envelope.command).await;
                emit_response(envelope.id, &response);
            }
            Err(e) => {
                warn!(error = %e, "discarding unparseable command line");
                emit_response(None, &CommandResponse::error(format!("invalid command: {e}")));
            }
        }
    }

    info!("stdin closed, shutting down");
    bridge.dispatch(Command::CleanupSession).await;
    Ok(())
}
