//! Catalog seed import
//!
//! A deployment whose catalog store is still empty can point `CATALOG_SEED`
//! at a JSON file exported from the catalog-management collaborator. The
//! import runs once at boot; afterwards the store is authoritative and the
//! file is never consulted again.

use std::path::Path;

use serde::Deserialize;
use shared::{Lot, Team};

use super::store::{CatalogStore, StoreResult};
use crate::utils::{AppError, AppResult};

/// Default allotment when a seed team does not configure a purse
/// (120 crore in the smallest currency unit).
pub const DEFAULT_INITIAL_PURSE: u64 = 1_200_000_000;

/// Seed file shape: `{ "lots": [...], "teams": [...] }`.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    pub lots: Vec<Lot>,
    #[serde(default)]
    pub teams: Vec<SeedTeam>,
}

/// Team entry in the seed file; purse fields are optional.
#[derive(Debug, Deserialize)]
pub struct SeedTeam {
    pub id: String,
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub initial_purse: Option<u64>,
}

impl SeedFile {
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let raw = std::fs::read(path.as_ref()).map_err(|e| {
            AppError::invalid(format!(
                "Cannot read catalog seed {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let seed: SeedFile = serde_json::from_slice(&raw)
            .map_err(|e| AppError::invalid(format!("Malformed catalog seed: {}", e)))?;
        if seed.lots.is_empty() {
            return Err(AppError::invalid("Catalog seed contains no lots"));
        }
        if seed.lots.iter().any(|lot| lot.base_price == 0) {
            return Err(AppError::invalid("Catalog seed lot with zero base price"));
        }
        Ok(seed)
    }

    /// Normalize into storable models: queue positions follow file order
    /// unless explicitly set, team purses default to the standard allotment.
    pub fn into_catalog(self) -> (Vec<Lot>, Vec<Team>) {
        let lots = self
            .lots
            .into_iter()
            .enumerate()
            .map(|(idx, mut lot)| {
                if lot.catalog_order == 0 {
                    lot.catalog_order = idx as u32 + 1;
                }
                lot
            })
            .collect();

        let teams = self
            .teams
            .into_iter()
            .map(|seed| {
                let purse = seed.initial_purse.unwrap_or(DEFAULT_INITIAL_PURSE);
                Team {
                    id: seed.id,
                    name: seed.name,
                    short_name: seed.short_name,
                    color: seed.color,
                    logo_url: seed.logo_url,
                    initial_purse: purse,
                    purse,
                    points: 0,
                    roster: vec![],
                }
            })
            .collect();

        (lots, teams)
    }
}

impl CatalogStore {
    /// Import the seed file iff the store has no lots yet.
    pub fn seed_if_empty(&self, path: impl AsRef<Path>) -> AppResult<bool> {
        if !self.is_empty().map_err(AppError::from)? {
            tracing::debug!("Catalog store already populated, seed skipped");
            return Ok(false);
        }

        let seed = SeedFile::from_path(&path)?;
        let (lots, teams) = seed.into_catalog();
        self.write_seed(&lots, &teams).map_err(AppError::from)?;
        tracing::info!(
            path = %path.as_ref().display(),
            lots = lots.len(),
            teams = teams.len(),
            "Catalog seeded"
        );
        Ok(true)
    }

    fn write_seed(&self, lots: &[Lot], teams: &[Team]) -> StoreResult<()> {
        self.replace_catalog(lots, teams)
    }
}
