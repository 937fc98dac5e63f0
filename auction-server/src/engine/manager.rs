//! AuctionManager - command processing and snapshot publication
//!
//! # Command Flow
//!
//! ```text
//! run() worker loop
//!     ├─ 1. Receive {envelope, identity, reply} from the queue
//!     ├─ 2. Authorize (role table + team ownership)
//!     ├─ 3. Validate (phase + monetary rules, pure)
//!     ├─ 4. Apply the transition to the in-memory session
//!     ├─ 5. MarkSold/MarkUnsold: durable write via ResultWriter
//!     │      └─ on failure the session parks the outcome and goes Held
//!     ├─ 6. Bump version, publish one snapshot
//!     └─ 7. Reply to the issuing connection only
//! ```
//!
//! Rejected commands skip 4-6 entirely: no mutation, no version bump, no
//! broadcast.

use std::sync::Arc;

use shared::payload::{CommandEnvelope, CommandResponse};
use shared::{AuctionCommand, CommandError, CommandErrorCode, Phase};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{ClientIdentity, authorize};
use crate::catalog::{CatalogSource, ResultWriter};

use super::session::AuctionSession;
use super::validator::{resolve_bidder, validate};
use super::{EngineHandle, EngineRequest, SnapshotHub};

/// Tuning knobs the manager takes from [`crate::core::Config`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Ledger entries included in each snapshot.
    pub snapshot_tail: usize,
    /// Maximum roster size per team.
    pub roster_cap: u32,
    /// Command queue depth.
    pub queue_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            snapshot_tail: 10,
            roster_cap: 25,
            queue_depth: 256,
        }
    }
}

/// Owns the session; runs as the single writer.
pub struct AuctionManager {
    session: AuctionSession,
    catalog: Arc<dyn CatalogSource>,
    writer: Arc<dyn ResultWriter>,
    hub: SnapshotHub,
    options: EngineOptions,
}

impl AuctionManager {
    pub fn new(
        session: AuctionSession,
        catalog: Arc<dyn CatalogSource>,
        writer: Arc<dyn ResultWriter>,
        hub: SnapshotHub,
        options: EngineOptions,
    ) -> Self {
        Self {
            session,
            catalog,
            writer,
            hub,
            options,
        }
    }

    /// Spawn the worker task and return the submit handle.
    pub fn spawn(self, shutdown: CancellationToken) -> EngineHandle {
        let (tx, rx) = mpsc::channel(self.options.queue_depth);
        tokio::spawn(self.run(rx, shutdown));
        EngineHandle::new(tx)
    }

    /// Drain the command queue until shutdown. Consumes the manager: the
    /// session has exactly one owner for its whole lifetime.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<EngineRequest>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Auction engine started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Auction engine shutting down");
                    break;
                }

                request = rx.recv() => {
                    let Some(request) = request else {
                        tracing::info!("Command queue closed, engine stopping");
                        break;
                    };
                    let response = self.execute(request.envelope, &request.identity);
                    // The issuer may have disconnected; state is already settled.
                    let _ = request.reply.send(response);
                }
            }
        }

        tracing::info!("Auction engine stopped");
    }

    /// Process one command and produce the reply for the issuer.
    pub fn execute(
        &mut self,
        envelope: CommandEnvelope,
        identity: &ClientIdentity,
    ) -> CommandResponse {
        let command_id = envelope.command_id.clone();
        match self.process(envelope.command, identity) {
            Ok(version) => {
                self.hub.publish(self.session.snapshot(self.options.snapshot_tail));
                CommandResponse::success(command_id, version)
            }
            Err(err) => {
                tracing::debug!(
                    command_id = %command_id,
                    subject = %identity.subject,
                    code = ?err.code,
                    reason = %err.message,
                    "Command rejected"
                );
                CommandResponse::error(command_id, err)
            }
        }
    }

    fn process(
        &mut self,
        command: AuctionCommand,
        identity: &ClientIdentity,
    ) -> Result<u64, CommandError> {
        tracing::info!(
            command = command.name(),
            subject = %identity.subject,
            role = ?identity.role,
            phase = ?self.session.phase(),
            "Processing command"
        );

        authorize(&command, identity)?;
        validate(&self.session, &command, identity, self.options.roster_cap)?;

        match command {
            AuctionCommand::Start => {
                self.session.arm_next_lot();
            }

            AuctionCommand::SelectLot { lot_id } => {
                self.session.arm_lot(&lot_id);
            }

            AuctionCommand::PlaceBid { amount, team_id } => {
                let bidder = resolve_bidder(identity, &team_id)?;
                self.session.apply_bid(&bidder, amount);
                tracing::info!(team_id = %bidder, amount, "Bid accepted");
            }

            AuctionCommand::MarkSold => {
                let record = self.session.finalize_sold();
                self.persist_outcome(record);
            }

            AuctionCommand::MarkUnsold => {
                let record = self.session.finalize_passed();
                self.persist_outcome(record);
            }

            AuctionCommand::Pause => {
                self.session.set_phase(Phase::Paused);
            }

            AuctionCommand::Resume => {
                self.session.set_phase(Phase::LotActive);
            }

            AuctionCommand::Retry => {
                let pending = self.session.take_pending_outcome().ok_or_else(|| {
                    CommandError::new(CommandErrorCode::InternalError, "held without an outcome")
                })?;
                match self.writer.record_outcome(&pending.record) {
                    Ok(()) => {
                        tracing::info!(lot_id = %pending.record.lot_id, "Held outcome persisted");
                        self.session.resume_from_held(pending.resume_phase);
                    }
                    Err(e) => {
                        tracing::error!(lot_id = %pending.record.lot_id, error = %e, "Retry failed");
                        self.session.restore_pending_outcome(pending);
                        return Err(CommandError::new(
                            CommandErrorCode::PersistenceFailed,
                            "durable write failed again",
                        ));
                    }
                }
            }

            AuctionCommand::Reset => {
                let data = self.catalog.load_all().map_err(|e| {
                    tracing::error!(error = %e, "Catalog reload failed, session unchanged");
                    CommandError::new(CommandErrorCode::InternalError, "catalog reload failed")
                })?;
                self.session.restore_catalog(data);
                tracing::info!("Session reset to Idle");
            }
        }

        Ok(self.session.bump_version())
    }

    /// Durable write after an optimistic in-memory finalization. On failure
    /// the session freezes in Held instead of diverging from storage.
    fn persist_outcome(&mut self, record: crate::catalog::OutcomeRecord) {
        if let Err(e) = self.writer.record_outcome(&record) {
            tracing::error!(
                lot_id = %record.lot_id,
                error = %e,
                "Durable write failed, session held"
            );
            self.session.enter_held(record);
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &AuctionSession {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogData, OutcomeRecord, StoreError};
    use parking_lot::Mutex;
    use shared::{Lot, LotStatus, Role, Team};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory catalog double; can be told to fail writes.
    struct MemoryCatalog {
        lots: Vec<Lot>,
        teams: Vec<Team>,
        fail_writes: AtomicBool,
        written: Mutex<Vec<OutcomeRecord>>,
    }

    impl MemoryCatalog {
        fn new(lots: Vec<Lot>, teams: Vec<Team>) -> Arc<Self> {
            Arc::new(Self {
                lots,
                teams,
                fail_writes: AtomicBool::new(false),
                written: Mutex::new(Vec::new()),
            })
        }

        fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        fn written(&self) -> Vec<OutcomeRecord> {
            self.written.lock().clone()
        }
    }

    impl CatalogSource for MemoryCatalog {
        fn load_all(&self) -> Result<CatalogData, StoreError> {
            let lots = self
                .lots
                .iter()
                .cloned()
                .map(|mut lot| {
                    lot.status = LotStatus::Pending;
                    lot.winning_team = None;
                    lot.final_price = None;
                    lot
                })
                .collect();
            let teams = self
                .teams
                .iter()
                .cloned()
                .map(|mut team| {
                    team.purse = team.initial_purse;
                    team.points = 0;
                    team.roster.clear();
                    team
                })
                .collect();
            Ok(CatalogData { lots, teams })
        }
    }

    impl ResultWriter for MemoryCatalog {
        fn record_outcome(&self, record: &OutcomeRecord) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::LotNotFound("storage offline".to_string()));
            }
            self.written.lock().push(record.clone());
            Ok(())
        }
    }

    fn lot(id: &str, order: u32, base: u64) -> Lot {
        Lot {
            id: id.to_string(),
            name: format!("Player {}", id),
            category: "BATTER".to_string(),
            nationality: "IN".to_string(),
            age: 27,
            image_url: None,
            points: 10,
            base_price: base,
            catalog_order: order,
            status: LotStatus::Pending,
            winning_team: None,
            final_price: None,
        }
    }

    fn team(id: &str, purse: u64) -> Team {
        Team {
            id: id.to_string(),
            name: format!("Team {}", id),
            short_name: id.to_uppercase(),
            color: None,
            logo_url: None,
            initial_purse: purse,
            purse,
            points: 0,
            roster: vec![],
        }
    }

    const BASE: u64 = 20_000_000;
    const PURSE: u64 = 1_200_000_000;

    fn manager_with(catalog: Arc<MemoryCatalog>) -> AuctionManager {
        let data = catalog.load_all().unwrap();
        let session = AuctionSession::from_catalog(data);
        let hub = SnapshotHub::new(session.snapshot(10), 64);
        AuctionManager::new(
            session,
            catalog.clone(),
            catalog,
            hub,
            EngineOptions::default(),
        )
    }

    fn standard_manager() -> (Arc<MemoryCatalog>, AuctionManager) {
        let catalog = MemoryCatalog::new(
            vec![lot("p1", 1, BASE), lot("p2", 2, BASE / 2)],
            vec![team("t1", PURSE), team("t2", PURSE)],
        );
        (catalog.clone(), manager_with(catalog))
    }

    fn operator() -> ClientIdentity {
        ClientIdentity {
            subject: "op".to_string(),
            name: "op".to_string(),
            role: Role::Operator,
            team_id: None,
        }
    }

    fn rep(team: &str) -> ClientIdentity {
        ClientIdentity {
            subject: format!("rep-{}", team),
            name: team.to_string(),
            role: Role::TeamRep,
            team_id: Some(team.to_string()),
        }
    }

    fn envelope(command: AuctionCommand) -> CommandEnvelope {
        CommandEnvelope {
            command_id: uuid::Uuid::new_v4().to_string(),
            command,
        }
    }

    fn run(
        manager: &mut AuctionManager,
        command: AuctionCommand,
        identity: &ClientIdentity,
    ) -> CommandResponse {
        let response = manager.execute(envelope(command), identity);
        manager.session().assert_invariants();
        response
    }

    fn bid(amount: u64, team: Option<&str>) -> AuctionCommand {
        AuctionCommand::PlaceBid {
            amount,
            team_id: team.map(str::to_string),
        }
    }

    #[test]
    fn test_start_opens_first_lot_at_base_price() {
        let (_catalog, mut manager) = standard_manager();
        let response = run(&mut manager, AuctionCommand::Start, &operator());
        assert!(response.success);
        assert_eq!(response.version, Some(1));

        let snap = manager.hub.latest();
        assert_eq!(snap.phase, Phase::LotActive);
        assert_eq!(snap.current_lot.as_ref().unwrap().id, "p1");
        // Opening price shown; no leader yet.
        assert_eq!(snap.current_bid, BASE);
        assert!(snap.leading_team.is_none());
    }

    #[test]
    fn test_scenario_a_floor_race() {
        let (_catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());

        // First bid at the opening price is accepted.
        let first = run(&mut manager, bid(BASE, None), &rep("t1"));
        assert!(first.success);
        let snap = manager.hub.latest();
        assert_eq!(snap.current_bid, BASE);
        assert_eq!(snap.leading_team.as_ref().unwrap().id, "t1");

        // An equal bid arriving second is evaluated against the updated
        // floor and rejected.
        let second = run(&mut manager, bid(BASE, None), &rep("t2"));
        assert!(!second.success);
        assert_eq!(
            second.error.unwrap().code,
            CommandErrorCode::BidTooLow
        );
    }

    #[test]
    fn test_scenario_b_insufficient_purse_leaves_state_unchanged() {
        let catalog = MemoryCatalog::new(
            vec![lot("p1", 1, 100)],
            vec![team("t1", 500), team("t2", 300)],
        );
        let mut manager = manager_with(catalog);
        manager.options.roster_cap = 25;

        run(&mut manager, AuctionCommand::Start, &operator());
        let accepted = run(&mut manager, bid(100, None), &rep("t1"));
        assert!(accepted.success);
        let before = manager.hub.latest();

        let rejected = run(&mut manager, bid(1000, None), &rep("t2"));
        assert!(!rejected.success);
        assert_eq!(
            rejected.error.unwrap().code,
            CommandErrorCode::InsufficientPurse
        );

        // Rejection is invisible to everyone else.
        let after = manager.hub.latest();
        assert_eq!(before, after);
        assert_eq!(manager.session().version(), before.version);
    }

    #[test]
    fn test_scenario_c_mark_sold_debits_and_advances() {
        let (catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());
        run(&mut manager, bid(BASE, None), &rep("t1"));
        let raised = BASE + 1_000_000;
        run(&mut manager, bid(raised, None), &rep("t2"));

        let sold = run(&mut manager, AuctionCommand::MarkSold, &operator());
        assert!(sold.success);

        let snap = manager.hub.latest();
        // Next lot armed at its own opening price.
        assert_eq!(snap.phase, Phase::LotActive);
        assert_eq!(snap.current_lot.as_ref().unwrap().id, "p2");
        assert_eq!(snap.current_bid, BASE / 2);
        assert!(snap.leading_team.is_none());

        let t2 = snap.teams.iter().find(|t| t.id == "t2").unwrap();
        assert_eq!(t2.purse, PURSE - raised);
        assert_eq!(t2.roster_size, 1);
        let t1 = snap.teams.iter().find(|t| t.id == "t1").unwrap();
        assert_eq!(t1.purse, PURSE);
        assert_eq!(t1.roster_size, 0);

        // Exactly one outcome written.
        let written = catalog.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].lot_id, "p1");
        assert_eq!(written[0].final_price, Some(raised));
        assert_eq!(written[0].team_id.as_deref(), Some("t2"));
    }

    #[test]
    fn test_scenario_d_pause_blocks_bids() {
        let (_catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());
        run(&mut manager, AuctionCommand::Pause, &operator());

        let rejected = run(&mut manager, bid(BASE, None), &rep("t1"));
        assert_eq!(
            rejected.error.unwrap().code,
            CommandErrorCode::PhaseError
        );

        run(&mut manager, AuctionCommand::Resume, &operator());
        let accepted = run(&mut manager, bid(BASE, None), &rep("t1"));
        assert!(accepted.success);
    }

    #[test]
    fn test_scenario_e_reset_restores_everything() {
        let (_catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());
        run(&mut manager, bid(BASE, None), &rep("t1"));
        run(&mut manager, AuctionCommand::MarkSold, &operator());

        let version_before = manager.session().version();
        let reset = run(&mut manager, AuctionCommand::Reset, &operator());
        assert!(reset.success);

        let snap = manager.hub.latest();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.current_lot.is_none());
        assert!(snap.recent_bids.is_empty());
        for team in &snap.teams {
            assert_eq!(team.purse, PURSE);
            assert_eq!(team.roster_size, 0);
        }
        // Versions stay monotonic across a reset so clients can still
        // order snapshots.
        assert_eq!(snap.version, version_before + 1);
    }

    #[test]
    fn test_version_bumps_only_on_accept() {
        let (_catalog, mut manager) = standard_manager();
        assert_eq!(manager.session().version(), 0);

        run(&mut manager, AuctionCommand::Start, &operator());
        assert_eq!(manager.session().version(), 1);

        // Unauthorized command: no bump.
        let rejected = run(&mut manager, AuctionCommand::MarkSold, &rep("t1"));
        assert!(!rejected.success);
        assert_eq!(manager.session().version(), 1);

        // Identical rejected bids leave the version untouched.
        run(&mut manager, bid(BASE, None), &rep("t1"));
        assert_eq!(manager.session().version(), 2);
        for _ in 0..2 {
            let dup = run(&mut manager, bid(BASE, None), &rep("t2"));
            assert!(!dup.success);
            assert_eq!(manager.session().version(), 2);
        }
    }

    #[test]
    fn test_mark_unsold_never_debits() {
        let (catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());
        let passed = run(&mut manager, AuctionCommand::MarkUnsold, &operator());
        assert!(passed.success);

        let snap = manager.hub.latest();
        assert_eq!(snap.current_lot.as_ref().unwrap().id, "p2");
        for team in &snap.teams {
            assert_eq!(team.purse, PURSE);
        }
        let written = catalog.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].outcome, LotStatus::Passed);
        assert!(written[0].team_id.is_none());
    }

    #[test]
    fn test_queue_exhaustion_completes_session() {
        let catalog = MemoryCatalog::new(vec![lot("p1", 1, BASE)], vec![team("t1", PURSE)]);
        let mut manager = manager_with(catalog);

        run(&mut manager, AuctionCommand::Start, &operator());
        run(&mut manager, AuctionCommand::MarkUnsold, &operator());
        assert_eq!(manager.hub.latest().phase, Phase::Completed);

        // Start from Completed with nothing left is a phase error.
        let rejected = run(&mut manager, AuctionCommand::Start, &operator());
        assert_eq!(
            rejected.error.unwrap().code,
            CommandErrorCode::PhaseError
        );
    }

    #[test]
    fn test_failed_write_holds_session() {
        let (catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());
        run(&mut manager, bid(BASE, None), &rep("t1"));

        catalog.set_fail_writes(true);
        let sold = run(&mut manager, AuctionCommand::MarkSold, &operator());
        // The command itself is accepted; the session reports Held.
        assert!(sold.success);

        let snap = manager.hub.latest();
        assert_eq!(snap.phase, Phase::Held);
        assert!(catalog.written().is_empty());

        // Everything except Retry/Reset is refused while held.
        for command in [
            AuctionCommand::Start,
            bid(BASE * 2, Some("t2")),
            AuctionCommand::MarkSold,
            AuctionCommand::Pause,
        ] {
            let rejected = run(&mut manager, command, &operator());
            assert_eq!(
                rejected.error.unwrap().code,
                CommandErrorCode::PhaseError
            );
        }

        // A failed retry keeps the session held, version unchanged.
        let version = manager.session().version();
        let retry = run(&mut manager, AuctionCommand::Retry, &operator());
        assert_eq!(
            retry.error.unwrap().code,
            CommandErrorCode::PersistenceFailed
        );
        assert_eq!(manager.session().version(), version);
        assert_eq!(manager.hub.latest().phase, Phase::Held);

        // Once storage recovers, Retry resumes where the sale left off.
        catalog.set_fail_writes(false);
        let retry = run(&mut manager, AuctionCommand::Retry, &operator());
        assert!(retry.success);
        let snap = manager.hub.latest();
        assert_eq!(snap.phase, Phase::LotActive);
        assert_eq!(snap.current_lot.as_ref().unwrap().id, "p2");
        assert_eq!(catalog.written().len(), 1);
    }

    #[test]
    fn test_select_lot_overrides_queue_order() {
        let (_catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());

        let selected = run(
            &mut manager,
            AuctionCommand::SelectLot {
                lot_id: "p2".to_string(),
            },
            &operator(),
        );
        assert!(selected.success);

        let snap = manager.hub.latest();
        assert_eq!(snap.current_lot.as_ref().unwrap().id, "p2");
        assert_eq!(snap.current_bid, BASE / 2);
        assert!(snap.leading_team.is_none());

        // The displaced lot keeps its turn.
        run(&mut manager, AuctionCommand::MarkUnsold, &operator());
        let snap = manager.hub.latest();
        assert_eq!(snap.current_lot.as_ref().unwrap().id, "p1");
    }

    #[test]
    fn test_reauctioned_lot_restarts_from_base_price() {
        let (_catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());
        run(&mut manager, bid(BASE, None), &rep("t1"));
        run(&mut manager, bid(BASE + 2_000_000, None), &rep("t2"));

        // Displace p1 mid-round, then pass the selected lot so p1 comes
        // back onto the block.
        run(
            &mut manager,
            AuctionCommand::SelectLot {
                lot_id: "p2".to_string(),
            },
            &operator(),
        );
        run(&mut manager, AuctionCommand::MarkUnsold, &operator());

        let snap = manager.hub.latest();
        assert_eq!(snap.current_lot.as_ref().unwrap().id, "p1");
        // The interrupted round is gone: floor back at the base price,
        // no stale ledger tail.
        assert_eq!(snap.current_bid, BASE);
        assert!(snap.leading_team.is_none());
        assert!(snap.recent_bids.is_empty());

        // An opening bid at the base price is accepted again, from the
        // team that was outbid in the interrupted round.
        let reopened = run(&mut manager, bid(BASE, None), &rep("t1"));
        assert!(reopened.success);
        let snap = manager.hub.latest();
        let amounts: Vec<u64> = snap.recent_bids.iter().map(|b| b.amount).collect();
        assert_eq!(amounts, [BASE]);
        assert_eq!(snap.leading_team.as_ref().unwrap().id, "t1");
    }

    #[test]
    fn test_leaderboard_ordering() {
        let (_catalog, mut manager) = standard_manager();
        run(&mut manager, AuctionCommand::Start, &operator());
        run(&mut manager, bid(BASE, None), &rep("t2"));
        run(&mut manager, AuctionCommand::MarkSold, &operator());

        let snap = manager.hub.latest();
        // t2 won points, so it leads the board despite the spent purse.
        assert_eq!(snap.teams[0].id, "t2");
        assert_eq!(snap.teams[0].points, 10);
    }

    #[tokio::test]
    async fn test_submit_via_handle() {
        let (_catalog, manager) = standard_manager();
        let hub = manager.hub.clone();
        let shutdown = CancellationToken::new();
        let handle = manager.spawn(shutdown.clone());

        let response = handle
            .submit(envelope(AuctionCommand::Start), operator())
            .await;
        assert!(response.success);
        assert_eq!(hub.latest().phase, Phase::LotActive);

        shutdown.cancel();
    }
}
