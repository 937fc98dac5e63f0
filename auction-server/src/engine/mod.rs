//! Auction orchestration engine
//!
//! Exactly one worker task owns the [`AuctionSession`] and drains a single
//! command queue, so all accepted mutations are totally ordered without a
//! lock on session fields. Everything else in the process talks to it
//! through an [`EngineHandle`] and observes it through the [`SnapshotHub`].

pub mod manager;
pub mod session;
pub mod validator;

pub use manager::AuctionManager;
pub use session::{AuctionSession, BidRecord, PendingOutcome};

use std::sync::Arc;

use parking_lot::RwLock;
use shared::payload::{CommandEnvelope, CommandResponse, SnapshotPayload};
use shared::{CommandError, CommandErrorCode};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::auth::ClientIdentity;

/// A command queued for the engine worker, tagged with the verified
/// identity of the issuing connection.
pub struct EngineRequest {
    pub envelope: CommandEnvelope,
    pub identity: ClientIdentity,
    pub reply: oneshot::Sender<CommandResponse>,
}

/// Clonable submit handle to the engine's command queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }

    /// Queue a command and await the engine's reply. The reply goes only to
    /// this caller; state changes reach everyone via the snapshot hub.
    pub async fn submit(
        &self,
        envelope: CommandEnvelope,
        identity: ClientIdentity,
    ) -> CommandResponse {
        let command_id = envelope.command_id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = EngineRequest {
            envelope,
            identity,
            reply: reply_tx,
        };

        if self.tx.send(request).await.is_err() {
            return CommandResponse::error(
                command_id,
                CommandError::new(CommandErrorCode::InternalError, "engine is shut down"),
            );
        }

        reply_rx.await.unwrap_or_else(|_| {
            CommandResponse::error(
                command_id,
                CommandError::new(CommandErrorCode::InternalError, "engine dropped the command"),
            )
        })
    }
}

/// Latest snapshot plus a push channel.
///
/// The worker publishes here once per accepted command; connections read
/// `latest()` when they attach (or fall behind) and follow the broadcast
/// channel otherwise. Slow receivers never block the worker.
#[derive(Clone)]
pub struct SnapshotHub {
    latest: Arc<RwLock<SnapshotPayload>>,
    tx: broadcast::Sender<SnapshotPayload>,
}

impl SnapshotHub {
    pub fn new(initial: SnapshotPayload, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            latest: Arc::new(RwLock::new(initial)),
            tx,
        }
    }

    /// Replace the latest snapshot and push it to all subscribers.
    pub fn publish(&self, snapshot: SnapshotPayload) {
        *self.latest.write() = snapshot.clone();
        // No subscribers is fine; connections pick up `latest` on attach.
        let _ = self.tx.send(snapshot);
    }

    pub fn latest(&self) -> SnapshotPayload {
        self.latest.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotPayload> {
        self.tx.subscribe()
    }
}
