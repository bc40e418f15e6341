//! WebSocket Game Server
//!
//! Async WebSocket server for the two game participants.
//! Accepts connections, seats them in the session and routes their messages.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::state::ConnectionId;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{GameSession, Outbox};

/// How long a closing connection's writer may take to flush queued messages.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections (seated or not).
    pub max_connections: usize,
    /// Outbound messages buffered per connection before it is dropped.
    pub outbound_queue: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            max_connections: 64,
            outbound_queue: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("ZK_RPS_BIND_ADDR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("ZK_RPS_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
            outbound_queue: std::env::var("ZK_RPS_OUTBOUND_QUEUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.outbound_queue),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client bookkeeping.
struct ConnectedClient {
    /// Remote address.
    addr: SocketAddr,
    /// Connection time.
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// The single game session.
    session: Arc<GameSession>,
    /// Open connections.
    clients: Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, session: Arc<GameSession>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            session,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "ZK-RPS server v{} listening on {}",
            self.config.version,
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let session = self.session.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let queue = self.config.outbound_queue;

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(queue);
            let connection = ConnectionId::new();

            // Spawn message sender task
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                // All senders gone: close politely.
                let _ = ws_sender.close().await;
            });

            let outbox = Outbox::new(msg_tx.clone());
            if session.connect(connection, outbox.clone()).await.is_err() {
                drop(outbox);
                // The session already queued the reason; flush it and close.
                drop(msg_tx);
                if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut sender_task).await.is_err() {
                    sender_task.abort();
                }
                debug!("Closed {} (game full)", addr);
                return;
            }

            clients.write().await.insert(connection, ConnectedClient {
                addr,
                connected_at: Instant::now(),
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        if msg_tx.try_send(ServerMessage::error("Invalid message format")).is_err() {
                                            warn!("Client {} is not reading, closing", addr);
                                            break;
                                        }
                                        continue;
                                    }
                                };

                                Self::handle_client_message(connection, client_msg, &session, &msg_tx).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                if msg_tx.try_send(ServerMessage::error("Binary frames are not supported")).is_err() {
                                    warn!("Client {} is not reading, closing", addr);
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = outbox.evicted() => {
                        warn!("Client {} fell behind on outbound messages, closing", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::info("Server shutting down"));
                        break;
                    }
                }
            }

            // Cleanup
            session.disconnect(connection).await;

            // Last senders gone: the writer flushes what is queued, then closes.
            drop(outbox);
            drop(msg_tx);
            if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut sender_task).await.is_err() {
                debug!("Writer for {} did not flush in time", addr);
                sender_task.abort();
            }

            if let Some(client) = clients.write().await.remove(&connection) {
                info!(
                    "Client {} cleaned up after {:?}",
                    client.addr,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle a client message.
    ///
    /// Prover-backed requests run on their own task so this connection keeps
    /// reading (and can observe its own disconnect) while they are pending.
    async fn handle_client_message(
        connection: ConnectionId,
        msg: ClientMessage,
        session: &Arc<GameSession>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::GetCommitment(req) => {
                let session = session.clone();
                tokio::spawn(async move { session.get_commitment(connection, req).await });
            }
            ClientMessage::PlayerReveal(req) => {
                let session = session.clone();
                tokio::spawn(async move { session.player_reveal(connection, req).await });
            }
            ClientMessage::PlayerCommit(req) => {
                session.player_commit(connection, req).await;
            }
            ClientMessage::ResetGame => {
                session.reset_game(connection).await;
            }
            ClientMessage::JoinGame => {
                session.join_game(connection).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.try_send(ServerMessage::Pong {
                    timestamp,
                    server_time: std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64,
                });
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
