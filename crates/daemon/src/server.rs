use crate::error::{DaemonError, Result};
use crate::service::{DaemonService, IndexStart};
use cidx_indexer::OperationKind;
use cidx_protocol::{Method, ProgressEvent, Request, Response, RpcError, RpcErrorKind};
use cidx_query::{QueryError, QueryRequest};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const PROGRESS_CHANNEL: usize = 256;

/// Accept loop for the per-project daemon socket. Runs until `cancel`
/// fires (or a client sends `shutdown`); connections are handled in their
/// own tasks and share the service via `Arc`.
pub async fn run_server(service: Arc<DaemonService>, cancel: CancellationToken) -> Result<()> {
    let socket_path = service.layout().socket_path();
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    std::fs::write(service.layout().daemon_pid_path(), std::process::id().to_string())?;
    log::info!("Daemon listening on {}", socket_path.display());

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let service = Arc::clone(&service);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, service, cancel).await {
                                log::debug!("Connection ended with error: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        log::warn!("Accept failed: {err}");
                    }
                }
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_file(service.layout().daemon_pid_path());
    log::info!("Daemon stopped");
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    service: Arc<DaemonService>,
    server_cancel: CancellationToken,
) -> Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::debug!("Frame read error: {err}");
                break;
            }
        };
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                send_frame(
                    &mut framed,
                    &Response::failure(
                        None,
                        RpcError::new(RpcErrorKind::InvalidInput, format!("bad frame: {err}")),
                    ),
                )
                .await?;
                continue;
            }
        };

        if let Some(session_id) = &request.session_id {
            service.sessions().touch(session_id);
        }

        match request.method {
            Method::Index => handle_index(&mut framed, &service, &request).await?,
            Method::Query => {
                let kind = request
                    .params
                    .get("kind")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("semantic")
                    .to_string();
                handle_query(&mut framed, &service, &request, &kind).await?;
            }
            Method::QueryFts => handle_query(&mut framed, &service, &request, "fts").await?,
            Method::QueryHybrid => {
                handle_query(&mut framed, &service, &request, "hybrid").await?;
            }
            Method::ClearCache => {
                service.clear_cache();
                send_frame(&mut framed, &Response::success(request.id, json!({"ok": true})))
                    .await?;
            }
            Method::Status => {
                send_frame(&mut framed, &Response::success(request.id, service.status()))
                    .await?;
            }
            Method::Shutdown => {
                send_frame(&mut framed, &Response::success(request.id, json!({"ok": true})))
                    .await?;
                server_cancel.cancel();
                break;
            }
        }
    }

    Ok(())
}

#[derive(Deserialize)]
struct IndexParams {
    #[serde(default = "default_mode")]
    mode: OperationKind,
    #[serde(default)]
    temporal: bool,
}

const fn default_mode() -> OperationKind {
    OperationKind::Incremental
}

async fn handle_index(
    framed: &mut Framed<UnixStream, LinesCodec>,
    service: &Arc<DaemonService>,
    request: &Request,
) -> Result<()> {
    let params: IndexParams = match serde_json::from_value(request.params.clone()) {
        Ok(params) => params,
        Err(err) => {
            return send_frame(
                framed,
                &Response::failure(
                    request.id,
                    RpcError::new(RpcErrorKind::InvalidInput, err.to_string()),
                ),
            )
            .await;
        }
    };

    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(PROGRESS_CHANNEL);
    match service.start_indexing(params.mode, params.temporal, tx) {
        IndexStart::AlreadyRunning => {
            send_frame(
                framed,
                &Response::success(request.id, json!({"status": "already_running"})),
            )
            .await
        }
        IndexStart::Started(mut done) => {
            let mut rx_open = true;
            loop {
                tokio::select! {
                    event = rx.recv(), if rx_open => {
                        match event {
                            Some(event) => {
                                if send_frame(framed, &Response::progress_update(request.id, event))
                                    .await
                                    .is_err()
                                {
                                    // Client went away; drain and commit.
                                    log::info!("Index client disconnected; cancelling run");
                                    service.cancel_indexing();
                                    let _ = (&mut done).await;
                                    return Ok(());
                                }
                            }
                            None => rx_open = false,
                        }
                    }
                    outcome = &mut done => {
                        // Flush any progress still queued before the final
                        // frame.
                        while let Ok(event) = rx.try_recv() {
                            let _ = send_frame(
                                framed,
                                &Response::progress_update(request.id, event),
                            )
                            .await;
                        }
                        let frame = match outcome {
                            Ok(Ok(stats)) => Response::success(
                                request.id,
                                json!({"status": "started", "stats": stats}),
                            ),
                            Ok(Err(message)) => Response::failure(
                                request.id,
                                RpcError::new(RpcErrorKind::Internal, message),
                            ),
                            Err(_) => Response::failure(
                                request.id,
                                RpcError::new(
                                    RpcErrorKind::Internal,
                                    "indexing task dropped".to_string(),
                                ),
                            ),
                        };
                        return send_frame(framed, &frame).await;
                    }
                }
            }
        }
    }
}

async fn handle_query(
    framed: &mut Framed<UnixStream, LinesCodec>,
    service: &Arc<DaemonService>,
    request: &Request,
    kind: &str,
) -> Result<()> {
    let query_request: QueryRequest = match serde_json::from_value(request.params.clone()) {
        Ok(query_request) => query_request,
        Err(err) => {
            return send_frame(
                framed,
                &Response::failure(
                    request.id,
                    RpcError::new(RpcErrorKind::InvalidInput, err.to_string()),
                ),
            )
            .await;
        }
    };

    let frame = match service.query(kind, query_request).await {
        Ok(response) => Response::success(request.id, serde_json::to_value(response)?),
        Err(err) => Response::failure(request.id, rpc_error_for(&err)),
    };
    send_frame(framed, &frame).await
}

fn rpc_error_for(err: &DaemonError) -> RpcError {
    let kind = match err {
        DaemonError::Query(QueryError::InvalidQuery(_)) => RpcErrorKind::InvalidInput,
        DaemonError::Query(QueryError::CollectionMissing(_)) => RpcErrorKind::CollectionMissing,
        DaemonError::Query(QueryError::DimensionMismatch { .. }) => {
            RpcErrorKind::DimensionMismatch
        }
        DaemonError::Query(QueryError::CacheExpired) => RpcErrorKind::CacheExpired,
        DaemonError::Indexer(cidx_indexer::IndexerError::FingerprintMismatch(_)) => {
            RpcErrorKind::FingerprintMismatch
        }
        DaemonError::Indexer(cidx_indexer::IndexerError::Cancelled) => RpcErrorKind::Cancelled,
        _ => RpcErrorKind::Internal,
    };
    RpcError::new(kind, err.to_string())
}

async fn send_frame(
    framed: &mut Framed<UnixStream, LinesCodec>,
    response: &Response,
) -> Result<()> {
    let line = serde_json::to_string(response)?;
    framed
        .send(line)
        .await
        .map_err(|err| DaemonError::Connection(err.to_string()))
}
