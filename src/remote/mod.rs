//! Inbound command relay.
//!
//! A tiny HTTP listener accepts commands (from Teams action buttons or
//! anything that can POST JSON) and queues them; the passthrough loop types
//! them into the wrapped program.

pub mod tunnel;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::term;

/// Placeholder sent by the "custom command" card button.
pub const CUSTOM_COMMAND: &str = "CUSTOM";

/// Commands received from the relay, oldest first.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl CommandQueue {
    pub fn push(&self, command: impl Into<String>) {
        self.lock().push_back(command.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next command as terminal input, newline included.
    pub fn next_input(&self) -> Option<String> {
        self.lock().pop_front().map(|command| format!("{command}\n"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        // A panic while holding the lock cannot leave the queue half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    #[serde(default)]
    command: String,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    "unknown".to_string()
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(json!({"status": "error", "message": message.into()})),
    )
}

async fn receive_command(State(queue): State<CommandQueue>, body: Bytes) -> impl IntoResponse {
    let request: CommandRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")),
    };
    let command = request.command.trim_end_matches(['\r', '\n']).to_string();
    if command.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "No command provided");
    }

    info!(source = %request.source, "remote command received");
    if command == CUSTOM_COMMAND {
        term::notice(&format!(
            "custom command requested from {}; POST {{\"command\": \"...\"}} to /command",
            request.source
        ));
    } else {
        queue.push(command.clone());
    }
    (
        StatusCode::OK,
        Json(json!({"status": "received", "command": command})),
    )
}

async fn health(State(queue): State<CommandQueue>) -> impl IntoResponse {
    Json(json!({"status": "healthy", "queue_size": queue.len()}))
}

pub fn router(queue: CommandQueue) -> Router {
    Router::new()
        .route("/command", post(receive_command))
        .route("/health", get(health))
        .with_state(queue)
}

/// Relay listener running on its own thread.
pub struct RelayServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind `bind:port` and serve the relay until shut down. Port 0 picks a
    /// free port; see [`RelayServer::local_addr`].
    pub fn start(bind: &str, port: u16, queue: CommandQueue) -> Result<Self> {
        let listener = std::net::TcpListener::bind((bind, port))
            .with_context(|| format!("failed to bind command relay on {bind}:{port}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to configure relay socket")?;
        let addr = listener.local_addr().context("relay socket has no address")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start relay runtime")?;
        let (tx, rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("command-relay".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            warn!(error = %e, "command relay could not adopt its socket");
                            return;
                        }
                    };
                    let served = axum::serve(listener, router(queue))
                        .with_graceful_shutdown(async {
                            let _ = rx.await;
                        })
                        .await;
                    if let Err(e) = served {
                        warn!(error = %e, "command relay stopped");
                    }
                });
            })
            .context("failed to spawn relay thread")?;

        info!(%addr, "command relay listening");
        Ok(Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop();
    }
}
