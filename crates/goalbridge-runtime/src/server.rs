//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.
//!
//! This is the local coordination-link surface: the session feeds deliveries
//! in and pulls link events out; the operator reads status and sets flags.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use goalbridge_core::{GlobalId, ItemRecord};

use crate::cli::ConnectTarget;
use crate::engine::SyncContext;
use crate::link::InboxDelivery;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, context: SyncContext) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another engine is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &context).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    context: &SyncContext,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: serde_json::Value = serde_json::from_str(line.trim())?;
    let response = handle_request(context, &request);

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

/// Build the full JSON-RPC response for one request.
pub(crate) fn handle_request(context: &SyncContext, request: &serde_json::Value) -> serde_json::Value {
    let method = request["method"].as_str().unwrap_or("");
    let params = &request["params"];
    let id = request["id"].clone();

    match dispatch(context, method, params) {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(e) => serde_json::json!({
            "jsonrpc": "2.0",
            "error": {"code": e.code, "message": e.message},
            "id": id,
        }),
    }
}

fn dispatch(
    context: &SyncContext,
    method: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, RpcError> {
    match method {
        "status" => {
            let memory = context.poll_status.borrow().clone();
            let repl = context.command_status.borrow().clone();
            // Audible check that the game side is really listening.
            if repl.state.is_connected() {
                context.status_cue.request();
            }
            Ok(serde_json::json!({ "memory": memory, "repl": repl }))
        }
        "outbox" => to_value(&*context.outbox.borrow()),
        "connect" => {
            let target = match params.get("target") {
                None => ConnectTarget::All,
                Some(raw) => serde_json::from_value::<ConnectTarget>(raw.clone())
                    .map_err(|e| RpcError::invalid_params(format!("invalid target: {e}")))?,
            };
            let memory = matches!(target, ConnectTarget::Memory | ConnectTarget::All)
                && context.memory_connect.request();
            let repl = matches!(target, ConnectTarget::Repl | ConnectTarget::All)
                && context.repl_connect.request();
            tracing::info!(?target, memory, repl, "connect requested");
            Ok(serde_json::json!({ "memory": memory, "repl": repl }))
        }
        "deliver" => {
            let field = |name: &str| {
                params[name]
                    .as_u64()
                    .ok_or_else(|| RpcError::invalid_params(format!("missing or invalid {name}")))
            };
            let index = field("index")?;
            let global_id = GlobalId(field("global_id")?);
            let source_player = params["source_player"].as_i64().unwrap_or(0);
            let delivery = InboxDelivery {
                index,
                record: ItemRecord {
                    global_id,
                    source_player,
                },
            };
            context.deliveries.send(delivery).map_err(|_| RpcError {
                code: INTERNAL_ERROR,
                message: "command agent is not running".into(),
            })?;
            Ok(serde_json::json!({ "queued": true, "index": index }))
        }
        "events" => {
            let since = params["since"].as_u64().unwrap_or(0);
            let journal = context.journal.lock().map_err(|_| RpcError {
                code: INTERNAL_ERROR,
                message: "link journal unavailable".into(),
            })?;
            let oldest_seq = journal.oldest_seq();
            Ok(serde_json::json!({
                "next_seq": journal.next_seq(),
                "oldest_seq": oldest_seq,
                "truncated": since < oldest_seq,
                "events": journal.since(since),
            }))
        }
        "clear_stall" => {
            let stalled = context.command_status.borrow().stalled.clone();
            let requested = stalled.is_some() && context.clear_stall.request();
            Ok(serde_json::json!({ "requested": requested, "stalled": stalled }))
        }
        _ => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: "method not found".into(),
        }),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError {
        code: INTERNAL_ERROR,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use tokio::sync::{mpsc, watch};

    use goalbridge_core::{
        CommandStatus, ConnectRequest, ConnectionState, PollStatus, RequestFlag, StalledDelivery,
    };

    use crate::engine::OutboxView;
    use crate::link::{JOURNAL_CAPACITY, LinkEvent, LinkJournal};

    struct Fixture {
        context: SyncContext,
        command_tx: watch::Sender<CommandStatus>,
        deliveries: mpsc::UnboundedReceiver<InboxDelivery>,
    }

    fn fixture() -> Fixture {
        let (_poll_tx, poll_status) = watch::channel(PollStatus::default());
        let (command_tx, command_status) = watch::channel(CommandStatus::default());
        let (_outbox_tx, outbox) = watch::channel(OutboxView {
            entries: vec![GlobalId(741_000_039)],
            cursor: 1,
            finished_game: false,
        });
        let (tx, deliveries) = mpsc::unbounded_channel();
        let context = SyncContext {
            poll_status,
            command_status,
            outbox,
            memory_connect: ConnectRequest::new(),
            repl_connect: ConnectRequest::new(),
            clear_stall: RequestFlag::new(),
            status_cue: RequestFlag::new(),
            deliveries: tx,
            journal: Arc::new(Mutex::new(LinkJournal::new())),
        };
        Fixture {
            context,
            command_tx,
            deliveries,
        }
    }

    fn call(ctx: &SyncContext, method: &str, params: serde_json::Value) -> serde_json::Value {
        handle_request(
            ctx,
            &serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1}),
        )
    }

    #[test]
    fn unknown_method_is_rpc_error() {
        let f = fixture();
        let resp = call(&f.context, "bogus", serde_json::json!({}));
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(resp["id"], 1);
    }

    #[test]
    fn connect_sets_requested_flags_once() {
        let f = fixture();
        let resp = call(&f.context, "connect", serde_json::json!({"target": "memory"}));
        assert_eq!(resp["result"], serde_json::json!({"memory": true, "repl": false}));
        // Still pending: a second request is a no-op.
        let resp = call(&f.context, "connect", serde_json::json!({}));
        assert_eq!(resp["result"], serde_json::json!({"memory": false, "repl": true}));
        assert!(f.context.memory_connect.is_pending());
        assert!(f.context.repl_connect.is_pending());
    }

    #[test]
    fn connect_rejects_unknown_target() {
        let f = fixture();
        let resp = call(&f.context, "connect", serde_json::json!({"target": "disk"}));
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }

    #[test]
    fn deliver_forwards_to_inbox_channel() {
        let mut f = fixture();
        let resp = call(
            &f.context,
            "deliver",
            serde_json::json!({"index": 0, "global_id": 741_000_039, "source_player": 3}),
        );
        assert_eq!(resp["result"]["queued"], true);
        let d = f.deliveries.try_recv().expect("queued");
        assert_eq!(d.index, 0);
        assert_eq!(d.record.global_id, GlobalId(741_000_039));
        assert_eq!(d.record.source_player, 3);
    }

    #[test]
    fn deliver_requires_index_and_id() {
        let f = fixture();
        let resp = call(&f.context, "deliver", serde_json::json!({"global_id": 1}));
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }

    #[test]
    fn events_since_sequence() {
        let f = fixture();
        {
            let mut j = f.context.journal.lock().expect("lock");
            j.record(LinkEvent::Discovered { ids: vec![GlobalId(1)] }, Utc::now());
            j.record(LinkEvent::Completed, Utc::now());
        }
        let resp = call(&f.context, "events", serde_json::json!({"since": 1}));
        assert_eq!(resp["result"]["next_seq"], 2);
        let events = resp["result"]["events"].as_array().expect("array");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["kind"], "completed");
        assert_eq!(resp["result"]["truncated"], false);
    }

    #[test]
    fn events_flag_entries_lost_to_the_cap() {
        let f = fixture();
        {
            let mut j = f.context.journal.lock().expect("lock");
            for _ in 0..JOURNAL_CAPACITY + 2 {
                j.record(LinkEvent::Discovered { ids: vec![GlobalId(1)] }, Utc::now());
            }
        }
        let resp = call(&f.context, "events", serde_json::json!({"since": 1}));
        assert_eq!(resp["result"]["oldest_seq"], 2);
        assert_eq!(resp["result"]["truncated"], true);

        let resp = call(&f.context, "events", serde_json::json!({"since": 2}));
        assert_eq!(resp["result"]["truncated"], false);
        assert_eq!(
            resp["result"]["events"].as_array().map(Vec::len),
            Some(JOURNAL_CAPACITY)
        );
    }

    #[test]
    fn outbox_reports_entries_and_cursor() {
        let f = fixture();
        let resp = call(&f.context, "outbox", serde_json::json!({}));
        assert_eq!(resp["result"]["entries"], serde_json::json!([741_000_039]));
        assert_eq!(resp["result"]["cursor"], 1);
    }

    #[test]
    fn status_requests_cue_only_when_repl_connected() {
        let f = fixture();
        let resp = call(&f.context, "status", serde_json::json!({}));
        assert_eq!(resp["result"]["memory"]["state"], "disconnected");
        assert!(!f.context.status_cue.is_pending());

        f.command_tx.send_replace(CommandStatus {
            state: ConnectionState::Connected,
            ..Default::default()
        });
        call(&f.context, "status", serde_json::json!({}));
        assert!(f.context.status_cue.is_pending());
    }

    #[test]
    fn clear_stall_only_when_stalled() {
        let f = fixture();
        let resp = call(&f.context, "clear_stall", serde_json::json!({}));
        assert_eq!(resp["result"]["requested"], false);

        f.command_tx.send_replace(CommandStatus {
            stalled: Some(StalledDelivery {
                index: 0,
                record: ItemRecord {
                    global_id: GlobalId(12),
                    source_player: 1,
                },
                reason: "unknown identifier".into(),
            }),
            ..Default::default()
        });
        let resp = call(&f.context, "clear_stall", serde_json::json!({}));
        assert_eq!(resp["result"]["requested"], true);
        assert_eq!(resp["result"]["stalled"]["index"], 0);
        assert!(f.context.clear_stall.is_pending());
    }

    #[tokio::test]
    async fn serves_requests_over_the_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("run").join("goalbridge.sock");
        let socket = socket.to_string_lossy().into_owned();
        let f = fixture();
        let server_socket = socket.clone();
        let context = f.context.clone();
        let handle = tokio::spawn(async move { run_server(&server_socket, context).await });

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match crate::client::rpc_call(&socket, "outbox", serde_json::json!({})).await {
                    Ok(v) => return v,
                    Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
                }
            }
        })
        .await
        .expect("server answered");
        assert_eq!(result["cursor"], 1);
        handle.abort();
    }
}
