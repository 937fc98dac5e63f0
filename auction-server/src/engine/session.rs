//! Authoritative auction session state
//!
//! One instance per deployment, owned by the engine worker. Nothing outside
//! the worker ever holds a mutable reference; clients only see versioned
//! snapshots. Mutation helpers assume the validator has already accepted
//! the command.

use std::collections::{HashMap, VecDeque};

use shared::payload::{BidEntry, LotView, SnapshotPayload, TeamRef, TeamSummary};
use shared::util::now_millis;
use shared::{Lot, LotStatus, Phase, Team};

use crate::catalog::{CatalogData, OutcomeRecord};

/// One accepted bid.
#[derive(Debug, Clone, PartialEq)]
pub struct BidRecord {
    pub lot_id: String,
    pub team_id: String,
    pub amount: u64,
    pub timestamp: i64,
}

/// Outcome whose durable write failed, parked while the session is Held.
#[derive(Debug, Clone)]
pub struct PendingOutcome {
    pub record: OutcomeRecord,
    /// Phase to resume into once the write lands.
    pub resume_phase: Phase,
}

/// The auction session singleton.
///
/// `current_bid` is the highest *accepted* bid: 0 exactly when no team is
/// leading. The opening price shown to clients while the floor is free is
/// derived in [`snapshot`](Self::snapshot), not stored.
#[derive(Debug)]
pub struct AuctionSession {
    phase: Phase,
    lots: HashMap<String, Lot>,
    teams: HashMap<String, Team>,
    /// Unsold lot ids in catalog order. The armed lot is not in the queue.
    remaining: VecDeque<String>,
    current_lot: Option<String>,
    current_bid: u64,
    leading_team: Option<String>,
    /// Bid history across the session. Append-only while a lot is on the
    /// block; a lot's entries are dropped if it is re-armed (its round
    /// restarts from the base price) and everything clears on reset.
    ledger: Vec<BidRecord>,
    version: u64,
    pending_outcome: Option<PendingOutcome>,
}

impl AuctionSession {
    /// Build a fresh Idle session from loaded catalog data.
    pub fn from_catalog(data: CatalogData) -> Self {
        let mut session = Self {
            phase: Phase::Idle,
            lots: HashMap::new(),
            teams: HashMap::new(),
            remaining: VecDeque::new(),
            current_lot: None,
            current_bid: 0,
            leading_team: None,
            ledger: Vec::new(),
            version: 0,
            pending_outcome: None,
        };
        session.install_catalog(data);
        session
    }

    /// Reset to Idle with freshly loaded catalog data, discarding all
    /// in-memory progress. The version counter survives so clients can
    /// still order snapshots across the reset.
    pub fn restore_catalog(&mut self, data: CatalogData) {
        self.phase = Phase::Idle;
        self.current_lot = None;
        self.current_bid = 0;
        self.leading_team = None;
        self.ledger.clear();
        self.pending_outcome = None;
        self.install_catalog(data);
    }

    fn install_catalog(&mut self, data: CatalogData) {
        self.lots.clear();
        self.teams.clear();
        self.remaining.clear();
        for lot in data.lots {
            if lot.is_pending() {
                self.remaining.push_back(lot.id.clone());
            }
            self.lots.insert(lot.id.clone(), lot);
        }
        for team in data.teams {
            self.teams.insert(team.id.clone(), team);
        }
    }

    // ========== Read access (validator, snapshots) ==========

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn current_bid(&self) -> u64 {
        self.current_bid
    }

    pub fn leading_team(&self) -> Option<&str> {
        self.leading_team.as_deref()
    }

    pub fn current_lot(&self) -> Option<&Lot> {
        self.current_lot.as_deref().and_then(|id| self.lots.get(id))
    }

    pub fn lot(&self, lot_id: &str) -> Option<&Lot> {
        self.lots.get(lot_id)
    }

    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.get(team_id)
    }

    pub fn remaining_is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn pending_outcome(&self) -> Option<&PendingOutcome> {
        self.pending_outcome.as_ref()
    }

    pub fn ledger(&self) -> &[BidRecord] {
        &self.ledger
    }

    // ========== Mutations (engine worker only) ==========

    /// Arm the next pending lot from the queue. Returns false when the
    /// queue is exhausted, in which case the session completes.
    pub fn arm_next_lot(&mut self) -> bool {
        while let Some(lot_id) = self.remaining.pop_front() {
            // Defensive skip; finalized lots never re-enter the queue.
            if self.lots.get(&lot_id).is_some_and(Lot::is_pending) {
                self.arm(lot_id);
                return true;
            }
        }
        self.current_lot = None;
        self.current_bid = 0;
        self.leading_team = None;
        self.phase = Phase::Completed;
        false
    }

    /// Explicitly arm a specific pending lot. The displaced lot (if any)
    /// returns to the front of the queue, keeping its turn.
    pub fn arm_lot(&mut self, lot_id: &str) {
        if let Some(displaced) = self.current_lot.take() {
            self.remaining.push_front(displaced);
        }
        self.remaining.retain(|id| id != lot_id);
        self.arm(lot_id.to_string());
    }

    /// Put a lot on the block with a clean floor. A displaced lot that
    /// comes back is re-auctioned from its base price, so any bids from
    /// its interrupted round are dropped to keep the per-lot ledger
    /// strictly increasing.
    fn arm(&mut self, lot_id: String) {
        self.ledger.retain(|bid| bid.lot_id != lot_id);
        self.current_lot = Some(lot_id);
        self.current_bid = 0;
        self.leading_team = None;
        self.phase = Phase::LotActive;
    }

    /// Record an accepted bid and move the floor.
    pub fn apply_bid(&mut self, team_id: &str, amount: u64) {
        let lot_id = self
            .current_lot
            .clone()
            .expect("apply_bid without an armed lot");
        self.ledger.push(BidRecord {
            lot_id,
            team_id: team_id.to_string(),
            amount,
            timestamp: now_millis(),
        });
        self.current_bid = amount;
        self.leading_team = Some(team_id.to_string());
    }

    /// Award the current lot to the leading team, debit the purse, and
    /// advance to the next lot (or complete). Returns the outcome to
    /// persist.
    pub fn finalize_sold(&mut self) -> OutcomeRecord {
        let lot_id = self
            .current_lot
            .clone()
            .expect("finalize_sold without an armed lot");
        let team_id = self
            .leading_team
            .clone()
            .expect("finalize_sold without a leading team");
        let price = self.current_bid;

        let points = {
            let lot = self.lots.get_mut(&lot_id).expect("armed lot exists");
            lot.status = LotStatus::Sold;
            lot.winning_team = Some(team_id.clone());
            lot.final_price = Some(price);
            lot.points
        };

        let team = self.teams.get_mut(&team_id).expect("leading team exists");
        // The validator guaranteed purse >= price when the bid was accepted.
        team.purse -= price;
        team.points += points;
        team.roster.push(lot_id.clone());

        let record = OutcomeRecord {
            lot_id,
            outcome: LotStatus::Sold,
            team_id: Some(team_id),
            final_price: Some(price),
            points,
            decided_at: now_millis(),
        };

        self.arm_next_lot();
        record
    }

    /// Pass the current lot permanently and advance.
    pub fn finalize_passed(&mut self) -> OutcomeRecord {
        let lot_id = self
            .current_lot
            .clone()
            .expect("finalize_passed without an armed lot");

        let lot = self.lots.get_mut(&lot_id).expect("armed lot exists");
        lot.status = LotStatus::Passed;

        let record = OutcomeRecord {
            lot_id,
            outcome: LotStatus::Passed,
            team_id: None,
            final_price: None,
            points: 0,
            decided_at: now_millis(),
        };

        self.arm_next_lot();
        record
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Park a failed durable write and freeze the session.
    pub fn enter_held(&mut self, record: OutcomeRecord) {
        self.pending_outcome = Some(PendingOutcome {
            record,
            resume_phase: self.phase,
        });
        self.phase = Phase::Held;
    }

    /// Take the parked outcome for a retry attempt.
    pub fn take_pending_outcome(&mut self) -> Option<PendingOutcome> {
        self.pending_outcome.take()
    }

    /// Put the parked outcome back after a failed retry.
    pub fn restore_pending_outcome(&mut self, pending: PendingOutcome) {
        self.pending_outcome = Some(pending);
    }

    /// Leave Held after a successful retry.
    pub fn resume_from_held(&mut self, resume_phase: Phase) {
        self.phase = resume_phase;
    }

    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    // ========== Snapshot ==========

    /// Serialize the full current state. `tail` bounds the ledger excerpt;
    /// only bids for the lot currently on the block are included.
    pub fn snapshot(&self, tail: usize) -> SnapshotPayload {
        let current_lot = self.current_lot().map(LotView::from);

        // While the floor is free the clients display the opening price.
        let display_bid = match (&current_lot, &self.leading_team) {
            (Some(view), None) => view.base_price,
            _ => self.current_bid,
        };

        let leading_team = self
            .leading_team
            .as_deref()
            .and_then(|id| self.teams.get(id))
            .map(|team| TeamRef {
                id: team.id.clone(),
                short_name: team.short_name.clone(),
            });

        // Leaderboard order: points first, deeper purse breaks ties.
        let mut teams: Vec<&Team> = self.teams.values().collect();
        teams.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then(b.purse.cmp(&a.purse))
                .then(a.id.cmp(&b.id))
        });
        let teams = teams.into_iter().map(TeamSummary::from).collect();

        let recent_bids = match &self.current_lot {
            Some(lot_id) => self
                .ledger
                .iter()
                .rev()
                .filter(|bid| &bid.lot_id == lot_id)
                .take(tail)
                .map(|bid| BidEntry {
                    team_id: bid.team_id.clone(),
                    amount: bid.amount,
                    timestamp: bid.timestamp,
                })
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect(),
            None => Vec::new(),
        };

        SnapshotPayload {
            version: self.version,
            phase: self.phase,
            current_lot,
            current_bid: display_bid,
            leading_team,
            teams,
            recent_bids,
        }
    }

    /// Invariant check used by tests after every accepted command.
    #[cfg(test)]
    pub fn assert_invariants(&self) {
        // currentBid = 0 <=> leadingTeam = None
        assert_eq!(self.current_bid == 0, self.leading_team.is_none());

        if self.current_bid > 0 {
            let lot = self.current_lot().expect("bid without an armed lot");
            assert!(self.current_bid >= lot.base_price);
        }

        if let Some(team_id) = &self.leading_team {
            let team = self.teams.get(team_id).expect("leading team exists");
            assert!(team.purse >= self.current_bid);
        }

        // Finalized lots never sit in the queue.
        for lot_id in &self.remaining {
            assert!(self.lots.get(lot_id).is_some_and(Lot::is_pending));
        }

        // Ledger amounts strictly increase per lot.
        let mut floors: HashMap<&str, u64> = HashMap::new();
        for bid in &self.ledger {
            let floor = floors.entry(bid.lot_id.as_str()).or_insert(0);
            assert!(bid.amount > *floor);
            *floor = bid.amount;
        }
    }
}
