//! Connection gateway
//!
//! Accepts TCP (optionally TLS) connections, verifies the identity claim in
//! the handshake, and from then on:
//! - tags every inbound command with the connection's verified identity and
//!   queues it for the engine;
//! - relays the engine's reply to the issuing connection only;
//! - forwards every snapshot broadcast, starting with the current one so a
//!   (re)connecting client is immediately consistent.
//!
//! The validator, not the gateway, makes authorization decisions: a client
//! cannot escalate by forging command payloads, because its identity comes
//! from the verified claim, never from the payload.

pub mod tls;
pub mod transport;

pub use tls::load_tls_config;
pub use transport::{TcpTransport, TlsTransport, Transport};

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use shared::message::{BusMessage, EventType, PROTOCOL_VERSION};
use shared::payload::{CommandEnvelope, CommandResponse, HandshakeAck, HandshakePayload};
use shared::{CommandError, CommandErrorCode};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::{ClientIdentity, JwtService};
use crate::engine::{EngineHandle, SnapshotHub};
use crate::utils::{AppError, AppResult};

/// Delay before closing a refused connection, so the client can still read
/// the error frame.
const HANDSHAKE_ERROR_DELAY_MS: u64 = 100;

/// Gateway listener configuration.
#[derive(Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    /// TLS termination; None = plain TCP (development only).
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

/// The realtime connection gateway.
#[derive(Clone)]
pub struct ConnectionGateway {
    config: GatewayConfig,
    engine: EngineHandle,
    hub: SnapshotHub,
    jwt: Arc<JwtService>,
    clients: Arc<DashMap<String, Arc<dyn Transport>>>,
    shutdown_token: CancellationToken,
}

impl ConnectionGateway {
    pub fn new(
        config: GatewayConfig,
        engine: EngineHandle,
        hub: SnapshotHub,
        jwt: Arc<JwtService>,
    ) -> Self {
        Self {
            config,
            engine,
            hub,
            jwt,
            clients: Arc::new(DashMap::new()),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    /// Gracefully stop the accept loop and all connection tasks.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down gateway");
        self.shutdown_token.cancel();
    }

    /// Number of authenticated connections.
    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> AppResult<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind: {}", e)))?;

        tracing::info!("Gateway listening on {}", self.config.listen_addr);

        let tls_acceptor = match &self.config.tls {
            Some(tls_config) => {
                tracing::info!("🔐 Gateway TLS enabled");
                Some(TlsAcceptor::from(tls_config.clone()))
            }
            None => {
                tracing::warn!("Gateway running without TLS (development mode)");
                None
            }
        };

        self.accept_loop(listener, tls_acceptor).await
    }

    /// Main accept loop
    async fn accept_loop(
        &self,
        listener: TcpListener,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> AppResult<()> {
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Gateway accept loop shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!("Client connected: {}", addr);
                            self.spawn_client_handler(stream, addr, tls_acceptor.clone());
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a new task to handle one client connection
    fn spawn_client_handler(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
    ) {
        let gateway = self.clone();

        tokio::spawn(async move {
            if let Err(e) = gateway
                .handle_client_connection(stream, addr, tls_acceptor)
                .await
            {
                tracing::debug!("Client {} handler finished: {}", addr, e);
            }
        });
    }

    /// Handle a single client connection end to end
    async fn handle_client_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> AppResult<()> {
        // TLS handshake if configured
        let transport: Arc<dyn Transport> = if let Some(acceptor) = tls_acceptor {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    tracing::debug!("🔐 Client {} TLS handshake successful", addr);
                    Arc::new(TlsTransport::new(tls_stream))
                }
                Err(e) => {
                    tracing::warn!("Client {} TLS handshake failed: {}", addr, e);
                    return Err(AppError::internal(format!("TLS handshake failed: {}", e)));
                }
            }
        } else {
            Arc::new(TcpTransport::from_stream(stream))
        };

        // Claim verification
        let identity = self.perform_handshake(&transport, addr).await?;
        let conn_id = Uuid::new_v4().to_string();

        // Register connection
        self.clients.insert(conn_id.clone(), transport.clone());
        tracing::info!(
            conn_id = %conn_id,
            subject = %identity.subject,
            role = ?identity.role,
            "Client authenticated"
        );

        // 连接断开时通知 forwarder 停止
        let disconnect_token = CancellationToken::new();

        // Start snapshot forwarding (sends the current snapshot first)
        let forward_handle = self.spawn_snapshot_forwarder(
            transport.clone(),
            conn_id.clone(),
            disconnect_token.clone(),
        );

        // Read commands until the client goes away
        self.read_client_commands(&transport, &identity, &conn_id, addr, disconnect_token)
            .await;

        // Cleanup
        forward_handle.abort();
        let _ = transport.close().await;
        self.clients.remove(&conn_id);
        tracing::debug!(conn_id = %conn_id, "Client removed from registry");

        Ok(())
    }

    /// Verify the handshake frame and its claim. Refused connections get a
    /// correlated error frame before the socket closes.
    async fn perform_handshake(
        &self,
        transport: &Arc<dyn Transport>,
        addr: SocketAddr,
    ) -> AppResult<ClientIdentity> {
        tracing::debug!("Waiting for handshake from {}", addr);

        let msg = transport.read_message().await.map_err(|e| {
            tracing::debug!("Client {} handshake error: {}", addr, e);
            e
        })?;

        if msg.event_type != EventType::Handshake {
            tracing::warn!(
                "❌ Client {} failed to handshake: expected Handshake, got {}",
                addr,
                msg.event_type
            );
            self.refuse_handshake(transport, &msg, "Expected Handshake message")
                .await;
            return Err(AppError::invalid("Expected Handshake message"));
        }

        let payload: HandshakePayload = match msg.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("❌ Client {} sent invalid handshake payload: {}", addr, e);
                self.refuse_handshake(transport, &msg, "Invalid handshake payload")
                    .await;
                return Err(AppError::invalid(format!(
                    "Invalid handshake payload: {}",
                    e
                )));
            }
        };

        // Version check
        if payload.version != PROTOCOL_VERSION {
            tracing::warn!(
                "❌ Client {} protocol version mismatch: expected {}, got {}",
                addr,
                PROTOCOL_VERSION,
                payload.version
            );
            self.refuse_handshake(
                transport,
                &msg,
                &format!(
                    "Protocol version mismatch: server={}, client={}",
                    PROTOCOL_VERSION, payload.version
                ),
            )
            .await;
            return Err(AppError::invalid("Protocol version mismatch"));
        }

        // Claim verification: signature, expiry, issuer, audience
        let claims = match self.jwt.validate_token(&payload.token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(
                    target: "security",
                    client_addr = %addr,
                    error = %e,
                    "Connection refused: invalid identity claim"
                );
                self.refuse_handshake(transport, &msg, "Invalid or expired identity claim")
                    .await;
                return Err(AppError::InvalidToken);
            }
        };

        let identity = ClientIdentity::from(claims);
        tracing::debug!(
            "✅ Client {} handshake success (subject: {}, client: {:?})",
            addr,
            identity.subject,
            payload.client_name
        );

        Ok(identity)
    }

    /// Send a refusal ack, give the client a moment to read it, move on.
    async fn refuse_handshake(
        &self,
        transport: &Arc<dyn Transport>,
        msg: &BusMessage,
        reason: &str,
    ) {
        let ack = HandshakeAck::refused(CommandError::new(
            CommandErrorCode::Unauthenticated,
            reason,
        ));
        let response = BusMessage::new(
            EventType::Response,
            serde_json::to_vec(&ack).expect("Failed to serialize handshake ack"),
        )
        .with_correlation_id(msg.request_id);

        if let Err(e) = transport.write_message(&response).await {
            tracing::debug!("Failed to send handshake refusal: {}", e);
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(HANDSHAKE_ERROR_DELAY_MS)).await;
    }

    /// Spawn the per-connection snapshot forwarder.
    ///
    /// Sends the acceptance ack and the current snapshot first, then relays
    /// every published snapshot. Subscribes before reading `latest` so no
    /// version can fall between the two.
    fn spawn_snapshot_forwarder(
        &self,
        transport: Arc<dyn Transport>,
        conn_id: String,
        disconnect_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let hub = self.hub.clone();
        let shutdown_token = self.shutdown_token.clone();

        tokio::spawn(async move {
            let mut rx = hub.subscribe();

            let ack = HandshakeAck::accepted(conn_id.clone());
            let ack_msg = BusMessage::new(
                EventType::Response,
                serde_json::to_vec(&ack).expect("Failed to serialize handshake ack"),
            );
            if let Err(e) = transport.write_message(&ack_msg).await {
                tracing::debug!(conn_id = %conn_id, "Failed to send handshake ack: {}", e);
                return;
            }

            // Immediate full snapshot: a (re)connecting client needs no replay.
            if let Err(e) = transport
                .write_message(&BusMessage::snapshot(&hub.latest()))
                .await
            {
                tracing::debug!(conn_id = %conn_id, "Failed to send initial snapshot: {}", e);
                return;
            }

            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => {
                        tracing::debug!(conn_id = %conn_id, "Forwarder shutting down");
                        break;
                    }
                    _ = disconnect_token.cancelled() => {
                        tracing::debug!(conn_id = %conn_id, "Client disconnected, forwarder stopping");
                        break;
                    }
                    msg_result = rx.recv() => {
                        match msg_result {
                            Ok(snapshot) => {
                                let msg = BusMessage::snapshot(&snapshot);
                                if let Err(e) = transport.write_message(&msg).await {
                                    tracing::debug!(conn_id = %conn_id, "Client write failed: {}", e);
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                // Snapshots are complete states; a lagged
                                // client only needs the newest one.
                                tracing::warn!(
                                    conn_id = %conn_id,
                                    dropped = n,
                                    "Client lagged, resyncing to latest snapshot"
                                );
                                let msg = BusMessage::snapshot(&hub.latest());
                                if let Err(e) = transport.write_message(&msg).await {
                                    tracing::debug!(conn_id = %conn_id, "Resync write failed: {}", e);
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                tracing::debug!(conn_id = %conn_id, "Snapshot channel closed");
                                break;
                            }
                        }
                    }
                }
            }

            tracing::debug!(conn_id = %conn_id, "Forwarder stopped");
        })
    }

    /// Read command frames from the client until disconnect or shutdown.
    async fn read_client_commands(
        &self,
        transport: &Arc<dyn Transport>,
        identity: &ClientIdentity,
        conn_id: &str,
        addr: SocketAddr,
        disconnect_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    break;
                }

                read_result = transport.read_message() => {
                    match read_result {
                        Ok(msg) => {
                            self.dispatch_client_frame(transport, identity, conn_id, addr, msg)
                                .await;
                        }
                        Err(AppError::ClientDisconnected) => {
                            tracing::debug!(conn_id = %conn_id, "Client {} disconnected", addr);
                            disconnect_token.cancel();
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(conn_id = %conn_id, "Client {} read error: {}", addr, e);
                            disconnect_token.cancel();
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Route one inbound frame. Only Command frames are meaningful after
    /// the handshake; anything else is dropped.
    async fn dispatch_client_frame(
        &self,
        transport: &Arc<dyn Transport>,
        identity: &ClientIdentity,
        conn_id: &str,
        addr: SocketAddr,
        msg: BusMessage,
    ) {
        if msg.event_type != EventType::Command {
            tracing::warn!(
                target: "security",
                client_addr = %addr,
                event_type = %msg.event_type,
                "Unexpected frame from authenticated client, dropping"
            );
            return;
        }

        let envelope: CommandEnvelope = match msg.parse_payload() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "Malformed command payload: {}", e);
                let response = CommandResponse::error(
                    String::new(),
                    CommandError::new(CommandErrorCode::InternalError, "malformed command payload"),
                );
                let reply = BusMessage::response(&response).with_correlation_id(msg.request_id);
                let _ = transport.write_message(&reply).await;
                return;
            }
        };

        // The single command queue totally orders concurrent bids; the
        // reply goes only to this connection.
        let response = self.engine.submit(envelope, identity.clone()).await;
        let reply = BusMessage::response(&response).with_correlation_id(msg.request_id);
        if let Err(e) = transport.write_message(&reply).await {
            tracing::debug!(conn_id = %conn_id, "Failed to send command reply: {}", e);
        }
    }
}
