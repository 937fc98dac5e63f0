//! Catalog boundary
//!
//! The engine touches durable storage through exactly two seams: a bulk
//! read at boot/reset ([`CatalogSource`]) and a durable write of terminal
//! outcomes ([`ResultWriter`]). Catalog CRUD lives in an external
//! collaborator; edits it makes become visible to a running engine only via
//! the next reset.

pub mod seed;
pub mod store;

pub use seed::SeedFile;
pub use store::{CatalogStore, StoreError};

use serde::{Deserialize, Serialize};
use shared::{Lot, LotStatus, Team};

/// Everything a fresh session needs, in catalog order.
#[derive(Debug, Clone)]
pub struct CatalogData {
    pub lots: Vec<Lot>,
    pub teams: Vec<Team>,
}

/// Terminal outcome of one lot, written durably at finalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeRecord {
    pub lot_id: String,
    /// `Sold` or `Passed`; never `Pending`.
    pub outcome: LotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_price: Option<u64>,
    /// Points credited to the winning team (0 when passed).
    #[serde(default)]
    pub points: u32,
    /// Milliseconds since epoch at finalization.
    pub decided_at: i64,
}

/// Bulk catalog read, used at boot and on reset only.
pub trait CatalogSource: Send + Sync {
    /// Load all lots (forced back to Pending) and teams (purse restored to
    /// the configured allotment, roster and points cleared).
    fn load_all(&self) -> Result<CatalogData, StoreError>;
}

/// Durable write of a lot's terminal outcome.
pub trait ResultWriter: Send + Sync {
    /// Persist the outcome atomically: lot status, team purse/roster, and
    /// the outcome event record. A returned error means nothing was
    /// committed.
    fn record_outcome(&self, record: &OutcomeRecord) -> Result<(), StoreError>;
}
