//! Auction domain models
//!
//! Shared between the engine and clients. Monetary amounts are integers in
//! the smallest currency unit; the engine never does fractional arithmetic.

use serde::{Deserialize, Serialize};

/// Connection role carried by the identity claim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Full control, including reset and persistence retry.
    Operator,
    /// Runs the auction on stage: start, select, sold/unsold, pause.
    Presenter,
    /// Bids for exactly one team.
    TeamRep,
}

impl Role {
    /// true if this role may drive the auction (start/select/finalize/pause)
    pub fn is_director(&self) -> bool {
        matches!(self, Role::Operator | Role::Presenter)
    }
}

/// Auction session phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Catalog loaded, nothing on the block yet.
    #[default]
    Idle,
    /// A lot is open for bidding.
    LotActive,
    /// Bidding suspended by the presenter.
    Paused,
    /// Queue exhausted.
    Completed,
    /// A durable write failed; only Retry/Reset are accepted.
    Held,
}

/// Lot sale status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotStatus {
    #[default]
    Pending,
    Sold,
    Passed,
}

/// A player up for auction.
///
/// Display attributes (name, category, nationality, age, image) are opaque
/// to the engine; it only reads `base_price`, `catalog_order` and the sale
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lot {
    pub id: String,
    pub name: String,
    /// Playing role shown on the presenter screen (batter, bowler, ...).
    pub category: String,
    pub nationality: String,
    pub age: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Gamification weight credited to the winning team.
    #[serde(default)]
    pub points: u32,
    /// Minimum opening bid, smallest currency unit. Always positive.
    pub base_price: u64,
    /// Stable position in the auction queue.
    #[serde(default)]
    pub catalog_order: u32,
    #[serde(default)]
    pub status: LotStatus,
    /// Winning team id, set iff `status == Sold`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_team: Option<String>,
    /// Hammer price, set iff `status == Sold`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_price: Option<u64>,
}

impl Lot {
    /// Lot has not been finalized yet.
    pub fn is_pending(&self) -> bool {
        self.status == LotStatus::Pending
    }
}

/// A franchise competing in the auction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub short_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    /// Configured allotment restored on reset.
    pub initial_purse: u64,
    /// Remaining budget. Non-increasing during a session except on reset.
    pub purse: u64,
    /// Sum of won lots' points.
    #[serde(default)]
    pub points: u32,
    /// Ids of won lots. Grows only on a Sold finalization.
    #[serde(default)]
    pub roster: Vec<String>,
}

impl Team {
    pub fn roster_size(&self) -> u32 {
        self.roster.len() as u32
    }
}
