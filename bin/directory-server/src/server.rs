//! TCP front end: one session per client connection

use crate::protocol::{Request, Response};
use anyhow::Result;
use directory_core::{callback, Connection, ServiceDirectory, Session};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type FrameSender = mpsc::UnboundedSender<Response>;

pub struct DirectoryServer {
    directory: Arc<ServiceDirectory>,
}

impl DirectoryServer {
    pub fn new(directory: Arc<ServiceDirectory>) -> Self {
        Self { directory }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let server = self.clone();
                    tokio::task::spawn(async move {
                        server.handle_connection(stream, peer_addr.to_string()).await;
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                }
            }
        }
    }

    /// Serve one client until it closes, then disconnect its session
    pub async fn handle_connection<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = Arc::new(Session::new());
        info!(connection = %session.id(), peer = %peer, "Client connected");

        let (reader, mut writer) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

        let connection = session.id();
        tokio::task::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let mut line = match serde_json::to_vec(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(connection = %connection, "Failed to encode frame: {}", e);
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = writer.write_all(&line).await {
                    debug!(connection = %connection, "Error writing to client: {}", e);
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!(connection = %connection, "Error reading from client: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => self.handle_request(&session, &tx, request).await,
                Err(e) => {
                    warn!(connection = %connection, "Malformed request: {}", e);
                    Response::error(format!("invalid request: {}", e))
                }
            };
            if tx.send(response).is_err() {
                break;
            }
        }

        // Removes the session's watches and deregisters its services
        session.disconnect().await;
        info!(connection = %connection, peer = %peer, "Client disconnected");
    }

    async fn handle_request(&self, session: &Arc<Session>, tx: &FrameSender, request: Request) -> Response {
        let hub = self.directory.hub();
        match request {
            Request::Register { record } => match self.directory.register(&**session, record).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::error(e.to_string()),
            },
            Request::Deregister { id } => match self.directory.deregister(&id).await {
                Ok(_) => Response::Ok,
                Err(e) => Response::error(e.to_string()),
            },
            Request::Watch { query } => {
                let tx = tx.clone();
                let connection = session.id();
                let on_event = callback(move |event| {
                    let tx = tx.clone();
                    async move {
                        if tx.send(Response::Event { event }).is_err() {
                            debug!(connection = %connection, "Dropping event for closed connection");
                        }
                    }
                });
                let watch_id = hub.register_watcher(&**session, query, on_event).await;
                Response::Watching { watch_id }
            }
            Request::Unwatch { watch_id } => {
                if hub.unregister_watcher(session.id(), watch_id).await {
                    Response::Ok
                } else {
                    Response::error(format!("unknown watch: {}", watch_id))
                }
            }
            Request::Query { query } => Response::Records {
                records: self.directory.find(&query).await,
            },
            Request::Metrics => match hub.metrics().gather() {
                Ok(text) => Response::Metrics { text },
                Err(e) => Response::error(e.to_string()),
            },
        }
    }
}
