//! WebSocket Game Server
//!
//! Async WebSocket front of a single match session. Accepts connections,
//! routes their messages into the session and delivers whatever the session
//! queued in reply.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{Sink, SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::network::protocol::{
    ClientMessage, ConnectionId, ErrorCode, ProtocolError, ServerError, ServerMessage,
};
use crate::network::session::MatchSession;

const DEFAULT_PORT: u16 = 8080;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound messages buffered per connection.
    pub outbound_queue: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 64,
            outbound_queue: 256,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CITADEL_BIND_ADDR` and `CITADEL_MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("CITADEL_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|e| GameServerError::Config(format!("CITADEL_BIND_ADDR={}: {}", addr, e)))?;
        }
        if let Some(max) = lookup("CITADEL_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|e| GameServerError::Config(format!("CITADEL_MAX_CONNECTIONS={}: {}", max, e)))?;
        }

        Ok(config)
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

    /// Message encoding error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Outbound side of one connection.
struct ClientHandle {
    /// Bounded queue drained by the connection's writer task.
    tx: mpsc::Sender<ServerMessage>,
    /// Fired when the server drops the connection on its own.
    evict: Arc<Notify>,
}

type ClientMap = BTreeMap<ConnectionId, ClientHandle>;
type Clients = Arc<RwLock<ClientMap>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// The match session.
    session: Arc<RwLock<MatchSession>>,
    /// Outbound queue per connection.
    clients: Clients,
    /// Connection id allocator.
    next_connection: Arc<AtomicU64>,
    /// Fired once the session has been torn down.
    session_closed: Arc<Notify>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server around a session.
    pub fn new(config: ServerConfig, session: MatchSession) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            session: Arc::new(RwLock::new(session)),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            next_connection: Arc::new(AtomicU64::new(1)),
            session_closed: Arc::new(Notify::new()),
            shutdown_tx,
        }
    }

    /// Bind and run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections until shutdown or until the session closes.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(async move {
                                    if let Ok(ws) = accept_async(stream).await {
                                        let (mut ws_sender, _) = ws.split();
                                        refuse(&mut ws_sender, ErrorCode::ServerOverloaded, "Server is full").await;
                                    }
                                });
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
                _ = self.session_closed.notified() => {
                    info!("Session closed, no longer accepting connections");
                    break;
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
        let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let session = self.session.clone();
        let clients = self.clients.clone();
        let closed = self.session_closed.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            if !session.read().await.is_accepting() {
                debug!("Turning away {} ({}): session not accepting", connection, addr);
                refuse(&mut ws_sender, ErrorCode::SessionClosed, "Session is not accepting players").await;
                return;
            }

            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_queue);
            let evict = Arc::new(Notify::new());
            clients.write().await.insert(connection, ClientHandle {
                tx: msg_tx.clone(),
                evict: evict.clone(),
            });

            let _ = msg_tx.try_send(ServerMessage::Welcome {
                connection,
                server_version: config.version.clone(),
            });

            // Single writer per connection keeps delivery in queue order
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let frame = match msg.to_frame() {
                        Ok(f) => f,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
            });

            let mut evicted = false;
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        Self::dispatch(connection, client_msg, &session, &clients, &closed).await;
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", connection, e);
                                        let _ = msg_tx.try_send(invalid_message());
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!("Binary frame from {} ignored", connection);
                                let _ = msg_tx.try_send(invalid_message());
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", connection);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", connection, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = evict.notified() => {
                        debug!("Client {} evicted", connection);
                        evicted = true;
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Cleanup
            clients.write().await.remove(&connection);
            {
                let mut session = session.write().await;
                session.disconnect(connection);
                Self::deliver(&mut session, &clients).await;
                if session.is_closed() {
                    closed.notify_one();
                }
            }

            drop(msg_tx);
            if evicted {
                // The peer is not reading, the writer may never finish
                sender_task.abort();
            } else {
                let _ = sender_task.await;
            }
            info!("Client {} ({}) cleaned up", connection, addr);
        });
    }

    /// Route one client message into the session.
    async fn dispatch(
        connection: ConnectionId,
        msg: ClientMessage,
        session: &RwLock<MatchSession>,
        clients: &RwLock<ClientMap>,
        closed: &Notify,
    ) {
        let mut session = session.write().await;
        session.handle_command(connection, msg);
        Self::deliver(&mut session, clients).await;
        if session.is_closed() {
            closed.notify_one();
        }
    }

    /// Move the session outbox into the connection queues.
    ///
    /// Called with the session write lock held, so queue order equals the
    /// order the session produced. Never waits on a queue: a connection
    /// whose queue is full or closed is evicted and disconnected from the
    /// session, and whatever that produces is delivered in turn.
    async fn deliver(session: &mut MatchSession, clients: &RwLock<ClientMap>) {
        loop {
            let outbox = session.drain_outbox();
            if outbox.is_empty() {
                return;
            }

            let mut stalled = BTreeSet::new();
            {
                let clients = clients.read().await;
                for (connection, message) in outbox {
                    if stalled.contains(&connection) {
                        continue;
                    }
                    let Some(client) = clients.get(&connection) else {
                        debug!("Dropping message for departed {}", connection);
                        continue;
                    };
                    match client.tx.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("Outbound queue for {} is full, dropping connection", connection);
                            stalled.insert(connection);
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("Queue for {} closed", connection);
                            stalled.insert(connection);
                        }
                    }
                }
            }

            if stalled.is_empty() {
                return;
            }

            let mut clients = clients.write().await;
            for connection in stalled {
                if let Some(client) = clients.remove(&connection) {
                    client.evict.notify_one();
                }
                session.disconnect(connection);
            }
        }
    }

    /// Run an authority-side operation on the session and deliver its output.
    pub async fn with_session<R>(&self, f: impl FnOnce(&mut MatchSession) -> R) -> R {
        let mut session = self.session.write().await;
        let result = f(&mut session);
        Self::deliver(&mut session, &self.clients).await;
        if session.is_closed() {
            self.session_closed.notify_one();
        }
        result
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Send one error frame and close.
async fn refuse<S>(sink: &mut S, code: ErrorCode, message: &str)
where
    S: Sink<Message> + Unpin,
{
    let refusal = ServerMessage::Error(ServerError {
        code,
        message: message.to_string(),
    });
    if let Ok(frame) = refusal.to_frame() {
        let _ = sink.send(frame).await;
    }
    let _ = sink.close().await;
}

fn invalid_message() -> ServerMessage {
    ServerMessage::Error(ServerError {
        code: ErrorCode::InvalidMessage,
        message: "Invalid message format".to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
