//! WebSocket Gateway
//!
//! Thin transport in front of the arena service. A connection first
//! presents a platform JWT; it then acts only for the participant that
//! token names, receives that participant's events and gets an `Ack` or
//! `Error` for every command.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::arena::auth::{self, AuthConfig};
use crate::arena::protocol::{Ack, ActionFrame, ArenaCommand, ErrorCode, ServerMessage};
use crate::arena::service::ArenaService;
use crate::core::ids::ParticipantId;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close connections silent for this long.
    pub idle_timeout: Duration,
    /// Outbound messages buffered per connection.
    pub outbound_buffer: usize,
    /// Token validation. With no key configured every login is refused.
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            outbound_buffer: 64,
            auth: AuthConfig::default(),
        }
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Authenticated participant.
    participant: Option<ParticipantId>,
    /// Connection time.
    connected_at: Instant,
}

/// WebSocket front end for an [`ArenaService`].
pub struct ArenaGateway {
    config: GatewayConfig,
    service: Arc<ArenaService>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
}

impl ArenaGateway {
    /// Create a gateway.
    pub fn new(config: GatewayConfig, service: Arc<ArenaService>) -> Self {
        Self {
            config,
            service,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GatewayError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind and serve until the service shuts down.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections on an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Arena gateway listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.service.shutdown_signal();

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
                    info!("Gateway shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let service = self.service.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);
            let mut events = service.subscribe();
            let mut shutdown_rx = service.shutdown_signal();

            clients.write().await.insert(addr, ConnectedClient {
                participant: None,
                connected_at: Instant::now(),
            });

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut bound: Option<ParticipantId> = None;
            loop {
                tokio::select! {
                    msg = tokio::time::timeout(config.idle_timeout, ws_receiver.next()) => {
                        let command = match msg {
                            Err(_) => {
                                info!("Closing idle connection {}", addr);
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => ArenaCommand::from_json(&text).ok(),
                            Ok(Some(Ok(Message::Binary(data)))) => {
                                ActionFrame::from_bytes(&data).ok().and_then(ActionFrame::into_command)
                            }
                            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Ok(Some(Err(e))) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Ping/pong frames are answered by tungstenite
                            Ok(Some(Ok(_))) => continue,
                        };

                        let reply = match command {
                            Some(command) => process_command(&service, &config.auth, &mut bound, command).await,
                            None => {
                                debug!("Invalid message from {}", addr);
                                ServerMessage::error(ErrorCode::Validation, "Invalid message format")
                            }
                        };
                        if let Some(participant) = bound {
                            if let Some(client) = clients.write().await.get_mut(&addr) {
                                client.participant = Some(participant);
                            }
                        }
                        if msg_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    event = events.recv() => {
                        match event {
                            Ok(event) => {
                                let concerned = bound.is_some_and(|p| event.concerns(p));
                                if concerned && msg_tx.send(ServerMessage::Event(event)).await.is_err() {
                                    break;
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("Client {} lagged, {} events dropped", addr, skipped);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Flush pending replies before closing
            drop(msg_tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;

            // Abandoned searches leave the queue; battles run out on their own
            if let Some(participant) = bound {
                let _ = service.leave_queue(participant).await;
            }

            let session = clients.write().await.remove(&addr).map(|c| c.connected_at.elapsed());
            info!("Client {} cleaned up after {:?}", addr, session.unwrap_or_default());
        });
    }
}

/// Run one command for a connection.
///
/// `bound` is set by a successful `Authenticate` and never changes after.
/// Every other command must act for the bound participant.
pub async fn process_command(
    service: &ArenaService,
    auth_config: &AuthConfig,
    bound: &mut Option<ParticipantId>,
    command: ArenaCommand,
) -> ServerMessage {
    match (&command, *bound) {
        (ArenaCommand::Tick { .. }, _) => {
            return ServerMessage::error(ErrorCode::Validation, "Tick is server-driven");
        }
        (ArenaCommand::Authenticate { .. }, Some(current)) => {
            return ServerMessage::error(
                ErrorCode::Validation,
                format!("Already authenticated as participant {}", current),
            );
        }
        (ArenaCommand::Authenticate { token }, None) => {
            return match auth::authenticate(token, auth_config) {
                Ok(participant) => {
                    info!("Connection authenticated as participant {}", participant);
                    *bound = Some(participant);
                    ServerMessage::Ack(Ack::Authenticated { participant_id: participant })
                }
                Err(e) => {
                    warn!("Authentication failed: {}", e);
                    ServerMessage::error(ErrorCode::Unauthenticated, e.to_string())
                }
            };
        }
        (_, None) => {
            return ServerMessage::error(ErrorCode::Unauthenticated, "Authenticate first");
        }
        (command, Some(current)) => {
            if command.participant() != Some(current) {
                return ServerMessage::error(
                    ErrorCode::Unauthenticated,
                    format!("Connection acts only for participant {}", current),
                );
            }
        }
    }

    match service.handle(command).await {
        Ok(ack) => ServerMessage::Ack(ack),
        Err(e) => ServerMessage::error(e.code(), e.to_string()),
    }
}
