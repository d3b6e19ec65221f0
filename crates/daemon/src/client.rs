use crate::error::{DaemonError, Result};
use cidx_indexer::ProjectLayout;
use cidx_protocol::{Method, ProgressEvent, Request, Response};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Short-lived client for the per-project daemon socket. Requests are
/// serial: one call owns the connection until its final frame arrives.
pub struct DaemonClient {
    framed: Framed<UnixStream, LinesCodec>,
    next_id: u64,
}

impl DaemonClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.map_err(|err| {
            DaemonError::Connection(format!(
                "cannot connect to {}: {err}",
                socket_path.display()
            ))
        })?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
            next_id: 0,
        })
    }

    /// Connect to the project daemon, spawning it in the background and
    /// polling the socket for up to five seconds when it is not running.
    pub async fn connect_or_start(layout: &ProjectLayout) -> Result<Self> {
        let socket_path = layout.socket_path();
        if let Ok(client) = Self::connect(&socket_path).await {
            log::debug!("Connected to running daemon");
            return Ok(client);
        }

        spawn_daemon(layout)?;

        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(DaemonError::Connection(
                    "daemon failed to start within timeout".to_string(),
                ));
            }
            if socket_path.exists() {
                if let Ok(client) = Self::connect(&socket_path).await {
                    log::info!("Connected to newly started daemon");
                    return Ok(client);
                }
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    /// Issue one call, forwarding progress frames to `on_progress` until
    /// the final result or error frame arrives.
    pub async fn call(
        &mut self,
        method: Method,
        params: serde_json::Value,
        session_id: Option<String>,
        mut on_progress: impl FnMut(ProgressEvent),
    ) -> Result<serde_json::Value> {
        self.next_id += 1;
        let request = Request {
            id: Some(self.next_id),
            method,
            params,
            session_id,
        };
        let line = serde_json::to_string(&request)?;
        self.framed
            .send(line)
            .await
            .map_err(|err| DaemonError::Connection(err.to_string()))?;

        while let Some(frame) = self.framed.next().await {
            let frame = frame.map_err(|err| DaemonError::Connection(err.to_string()))?;
            let response: Response = serde_json::from_str(&frame)?;
            if let Some(event) = response.progress {
                on_progress(event);
                continue;
            }
            if let Some(error) = response.error {
                return Err(DaemonError::Rpc(error));
            }
            if let Some(result) = response.result {
                return Ok(result);
            }
        }
        Err(DaemonError::Connection(
            "connection closed before final frame".to_string(),
        ))
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.call(Method::Shutdown, serde_json::json!({}), None, |_| {})
            .await
            .map(|_| ())
    }
}

/// True when a daemon socket is live for the project.
pub async fn is_daemon_running(layout: &ProjectLayout) -> bool {
    DaemonClient::connect(&layout.socket_path()).await.is_ok()
}

fn spawn_daemon(layout: &ProjectLayout) -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|err| DaemonError::Connection(format!("cannot locate executable: {err}")))?;
    log::debug!("Spawning daemon: {} start --foreground", exe.display());
    Command::new(&exe)
        .arg("start")
        .arg("--foreground")
        .arg(layout.root())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| DaemonError::Connection(format!("failed to spawn daemon: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::run_server;
    use crate::service::{DaemonService, ServiceConfig};
    use crate::sessions::SessionSettings;
    use cidx_indexer::ProjectConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn running_daemon(root: &Path) -> (Arc<DaemonService>, CancellationToken) {
        let mut config = ProjectConfig::default();
        config.embedding.provider = "stub".to_string();
        config.embedding.model = "stub-64d".to_string();
        config.embedding.dimension = 64;
        config.workers = 2;
        let service = DaemonService::new(ServiceConfig {
            layout: ProjectLayout::new(root),
            config,
            sessions: SessionSettings::default(),
        })
        .unwrap();

        let cancel = CancellationToken::new();
        let server_service = Arc::clone(&service);
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = run_server(server_service, server_cancel).await;
        });

        // Wait for the socket to appear.
        let socket = service.layout().socket_path();
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (service, cancel)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn index_and_query_over_the_socket() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("auth.rs"), "fn verify_token(token: &str) {}\n")
            .unwrap();
        let (service, cancel) = running_daemon(tmp.path()).await;

        let mut client = DaemonClient::connect(&service.layout().socket_path())
            .await
            .unwrap();

        let mut progress_events = Vec::new();
        let result = client
            .call(
                Method::Index,
                serde_json::json!({"mode": "clear"}),
                None,
                |event| progress_events.push(event),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], serde_json::json!("started"));
        assert!(progress_events.iter().any(|e| e.is_status()));

        let response = client
            .call(
                Method::Query,
                serde_json::json!({"query": "verify token", "limit": 5, "kind": "semantic"}),
                Some("mcp-session-1".to_string()),
                |_| {},
            )
            .await
            .unwrap();
        let results = response["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["path"], serde_json::json!("auth.rs"));
        assert_eq!(service.sessions().len(), 1);

        let status = client
            .call(Method::Status, serde_json::json!({}), None, |_| {})
            .await
            .unwrap();
        assert_eq!(status["indexing"], serde_json::json!(false));

        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_index_calls_get_one_started_one_already_running() {
        let tmp = TempDir::new().unwrap();
        for i in 0..30 {
            std::fs::write(
                tmp.path().join(format!("f{i}.rs")),
                format!("fn f{i}() {{}}\n"),
            )
            .unwrap();
        }
        let (service, cancel) = running_daemon(tmp.path()).await;
        let socket = service.layout().socket_path();

        let socket_a = socket.clone();
        let a = tokio::spawn(async move {
            let mut client = DaemonClient::connect(&socket_a).await.unwrap();
            client
                .call(
                    Method::Index,
                    serde_json::json!({"mode": "clear"}),
                    None,
                    |_| {},
                )
                .await
                .unwrap()
        });
        let socket_b = socket.clone();
        let b = tokio::spawn(async move {
            let mut client = DaemonClient::connect(&socket_b).await.unwrap();
            client
                .call(
                    Method::Index,
                    serde_json::json!({"mode": "clear"}),
                    None,
                    |_| {},
                )
                .await
                .unwrap()
        });

        let (first, second) = tokio::join!(a, b);
        let statuses = [
            first.unwrap()["status"].as_str().unwrap().to_string(),
            second.unwrap()["status"].as_str().unwrap().to_string(),
        ];
        assert!(statuses.contains(&"started".to_string()));
        assert!(statuses.contains(&"already_running".to_string()));

        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unknown_collection_query_reports_missing() {
        let tmp = TempDir::new().unwrap();
        let (service, cancel) = running_daemon(tmp.path()).await;

        let mut client = DaemonClient::connect(&service.layout().socket_path())
            .await
            .unwrap();
        let err = client
            .call(
                Method::Query,
                serde_json::json!({"query": "anything", "limit": 5}),
                None,
                |_| {},
            )
            .await
            .unwrap_err();
        match err {
            DaemonError::Rpc(rpc) => {
                assert_eq!(rpc.kind, cidx_protocol::RpcErrorKind::CollectionMissing);
            }
            other => panic!("expected rpc error, got {other}"),
        }

        cancel.cancel();
    }
}
