//! redb-based catalog storage
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `lots` | lot_id | JSON `Lot` | Catalog lots incl. sale markers |
//! | `teams` | team_id | JSON `Team` | Teams incl. current purse |
//! | `outcomes` | lot_id | JSON `OutcomeRecord` | Terminal outcome log |
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate` by default; a commit that
//! returns `Ok` survives power loss and the file is always in a consistent
//! state. `record_outcome` relies on this: either the whole finalization
//! (lot + purse + outcome) lands, or none of it does.

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use shared::{Lot, LotStatus, Team};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::{CatalogData, CatalogSource, OutcomeRecord, ResultWriter};

/// Catalog lots: key = lot_id, value = JSON-serialized Lot
const LOTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("lots");

/// Teams: key = team_id, value = JSON-serialized Team
const TEAMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("teams");

/// Outcome log: key = lot_id, value = JSON-serialized OutcomeRecord
const OUTCOMES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("outcomes");

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lot not found: {0}")]
    LotNotFound(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Purse underflow: team {team} has {purse}, debit {debit}")]
    PurseUnderflow { team: String, purse: u64, debit: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Catalog storage backed by redb
#[derive(Clone)]
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;

        // Create all tables if they don't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LOTS_TABLE)?;
            let _ = write_txn.open_table(TEAMS_TABLE)?;
            let _ = write_txn.open_table(OUTCOMES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// true if no lots have been imported yet
    pub fn is_empty(&self) -> StoreResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOTS_TABLE)?;
        Ok(table.is_empty()?)
    }

    /// Replace the whole catalog in one transaction. Used by the seed
    /// import; a running session never calls this.
    pub fn replace_catalog(&self, lots: &[Lot], teams: &[Team]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut lots_table = write_txn.open_table(LOTS_TABLE)?;
            for lot in lots {
                let bytes = serde_json::to_vec(lot)?;
                lots_table.insert(lot.id.as_str(), bytes.as_slice())?;
            }

            let mut teams_table = write_txn.open_table(TEAMS_TABLE)?;
            for team in teams {
                let bytes = serde_json::to_vec(team)?;
                teams_table.insert(team.id.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;

        tracing::info!(lots = lots.len(), teams = teams.len(), "Catalog written");
        Ok(())
    }

    /// Read back a stored lot (sale markers included).
    pub fn lot(&self, lot_id: &str) -> StoreResult<Lot> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOTS_TABLE)?;
        let entry = table
            .get(lot_id)?
            .ok_or_else(|| StoreError::LotNotFound(lot_id.to_string()))?;
        Ok(serde_json::from_slice(entry.value())?)
    }

    /// Read back a stored team (current purse, not the configured one).
    pub fn team(&self, team_id: &str) -> StoreResult<Team> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TEAMS_TABLE)?;
        let entry = table
            .get(team_id)?
            .ok_or_else(|| StoreError::TeamNotFound(team_id.to_string()))?;
        Ok(serde_json::from_slice(entry.value())?)
    }

    /// Read back the recorded outcome for a lot, if any.
    pub fn outcome(&self, lot_id: &str) -> StoreResult<Option<OutcomeRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTCOMES_TABLE)?;
        match table.get(lot_id)? {
            Some(entry) => Ok(Some(serde_json::from_slice(entry.value())?)),
            None => Ok(None),
        }
    }
}

impl CatalogSource for CatalogStore {
    fn load_all(&self) -> StoreResult<CatalogData> {
        let read_txn = self.db.begin_read()?;

        let lots_table = read_txn.open_table(LOTS_TABLE)?;
        let mut lots = Vec::new();
        for entry in lots_table.iter()? {
            let (_, value) = entry?;
            let mut lot: Lot = serde_json::from_slice(value.value())?;
            // A fresh session ignores any sale markers left by a previous
            // run; the outcome log keeps the history.
            lot.status = LotStatus::Pending;
            lot.winning_team = None;
            lot.final_price = None;
            lots.push(lot);
        }
        lots.sort_by_key(|lot| lot.catalog_order);

        let teams_table = read_txn.open_table(TEAMS_TABLE)?;
        let mut teams = Vec::new();
        for entry in teams_table.iter()? {
            let (_, value) = entry?;
            let mut team: Team = serde_json::from_slice(value.value())?;
            team.purse = team.initial_purse;
            team.points = 0;
            team.roster.clear();
            teams.push(team);
        }
        teams.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::info!(lots = lots.len(), teams = teams.len(), "Catalog loaded");
        Ok(CatalogData { lots, teams })
    }
}

impl ResultWriter for CatalogStore {
    fn record_outcome(&self, record: &OutcomeRecord) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut lots_table = write_txn.open_table(LOTS_TABLE)?;
            let mut lot: Lot = {
                let entry = lots_table
                    .get(record.lot_id.as_str())?
                    .ok_or_else(|| StoreError::LotNotFound(record.lot_id.clone()))?;
                serde_json::from_slice(entry.value())?
            };
            lot.status = record.outcome;
            lot.winning_team = record.team_id.clone();
            lot.final_price = record.final_price;
            let bytes = serde_json::to_vec(&lot)?;
            lots_table.insert(record.lot_id.as_str(), bytes.as_slice())?;

            if let (Some(team_id), Some(price)) = (&record.team_id, record.final_price) {
                let mut teams_table = write_txn.open_table(TEAMS_TABLE)?;
                let mut team: Team = {
                    let entry = teams_table
                        .get(team_id.as_str())?
                        .ok_or_else(|| StoreError::TeamNotFound(team_id.clone()))?;
                    serde_json::from_slice(entry.value())?
                };
                team.purse = team.purse.checked_sub(price).ok_or_else(|| {
                    StoreError::PurseUnderflow {
                        team: team_id.clone(),
                        purse: team.purse,
                        debit: price,
                    }
                })?;
                team.points += record.points;
                team.roster.push(record.lot_id.clone());
                let bytes = serde_json::to_vec(&team)?;
                teams_table.insert(team_id.as_str(), bytes.as_slice())?;
            }

            let mut outcomes_table = write_txn.open_table(OUTCOMES_TABLE)?;
            let bytes = serde_json::to_vec(record)?;
            outcomes_table.insert(record.lot_id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        tracing::info!(
            lot_id = %record.lot_id,
            outcome = ?record.outcome,
            team_id = ?record.team_id,
            final_price = ?record.final_price,
            "Outcome recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::util::now_millis;

    fn sample_lot(id: &str, order: u32) -> Lot {
        Lot {
            id: id.to_string(),
            name: format!("Player {}", id),
            category: "BATTER".to_string(),
            nationality: "IN".to_string(),
            age: 28,
            image_url: None,
            points: 50,
            base_price: 20_000_000,
            catalog_order: order,
            status: LotStatus::Pending,
            winning_team: None,
            final_price: None,
        }
    }

    fn sample_team(id: &str) -> Team {
        Team {
            id: id.to_string(),
            name: format!("Team {}", id),
            short_name: id.to_uppercase(),
            color: None,
            logo_url: None,
            initial_purse: 1_200_000_000,
            purse: 1_200_000_000,
            points: 0,
            roster: vec![],
        }
    }

    fn open_store() -> (tempfile::TempDir, CatalogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_load_all_orders_by_catalog_order() {
        let (_dir, store) = open_store();
        store
            .replace_catalog(
                &[sample_lot("b", 2), sample_lot("a", 1), sample_lot("c", 3)],
                &[sample_team("t1")],
            )
            .unwrap();

        let data = store.load_all().unwrap();
        let ids: Vec<&str> = data.lots.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_record_outcome_debits_once() {
        let (_dir, store) = open_store();
        store
            .replace_catalog(&[sample_lot("p1", 1)], &[sample_team("t1")])
            .unwrap();

        let record = OutcomeRecord {
            lot_id: "p1".to_string(),
            outcome: LotStatus::Sold,
            team_id: Some("t1".to_string()),
            final_price: Some(25_000_000),
            points: 50,
            decided_at: now_millis(),
        };
        store.record_outcome(&record).unwrap();

        let team = store.team("t1").unwrap();
        assert_eq!(team.purse, 1_200_000_000 - 25_000_000);
        assert_eq!(team.points, 50);
        assert_eq!(team.roster, vec!["p1".to_string()]);

        let lot = store.lot("p1").unwrap();
        assert_eq!(lot.status, LotStatus::Sold);
        assert_eq!(lot.final_price, Some(25_000_000));

        assert_eq!(store.outcome("p1").unwrap(), Some(record));
    }

    #[test]
    fn test_passed_outcome_touches_no_team() {
        let (_dir, store) = open_store();
        store
            .replace_catalog(&[sample_lot("p1", 1)], &[sample_team("t1")])
            .unwrap();

        store
            .record_outcome(&OutcomeRecord {
                lot_id: "p1".to_string(),
                outcome: LotStatus::Passed,
                team_id: None,
                final_price: None,
                points: 0,
                decided_at: now_millis(),
            })
            .unwrap();

        assert_eq!(store.team("t1").unwrap().purse, 1_200_000_000);
        assert_eq!(store.lot("p1").unwrap().status, LotStatus::Passed);
    }

    #[test]
    fn test_purse_underflow_commits_nothing() {
        let (_dir, store) = open_store();
        let mut team = sample_team("t1");
        team.initial_purse = 1_000;
        team.purse = 1_000;
        store
            .replace_catalog(&[sample_lot("p1", 1)], &[team])
            .unwrap();

        let err = store
            .record_outcome(&OutcomeRecord {
                lot_id: "p1".to_string(),
                outcome: LotStatus::Sold,
                team_id: Some("t1".to_string()),
                final_price: Some(5_000),
                points: 0,
                decided_at: now_millis(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::PurseUnderflow { .. }));

        // The aborted transaction left everything untouched.
        assert_eq!(store.team("t1").unwrap().purse, 1_000);
        assert_eq!(store.lot("p1").unwrap().status, LotStatus::Pending);
        assert!(store.outcome("p1").unwrap().is_none());
    }

    #[test]
    fn test_load_all_resets_previous_run() {
        let (_dir, store) = open_store();
        store
            .replace_catalog(&[sample_lot("p1", 1)], &[sample_team("t1")])
            .unwrap();
        store
            .record_outcome(&OutcomeRecord {
                lot_id: "p1".to_string(),
                outcome: LotStatus::Sold,
                team_id: Some("t1".to_string()),
                final_price: Some(30_000_000),
                points: 50,
                decided_at: now_millis(),
            })
            .unwrap();

        let data = store.load_all().unwrap();
        assert_eq!(data.lots[0].status, LotStatus::Pending);
        assert!(data.lots[0].winning_team.is_none());
        assert_eq!(data.teams[0].purse, 1_200_000_000);
        assert!(data.teams[0].roster.is_empty());
    }
}
