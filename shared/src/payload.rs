//! Wire payloads for the auction protocol
//!
//! Commands flow client → engine, responses flow back to the issuing
//! connection only, snapshots are broadcast to everyone.

use serde::{Deserialize, Serialize};

use crate::models::{Lot, Phase, Team};

/// Handshake payload — first frame on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// Protocol version, must match the server's.
    pub version: u16,
    /// Signed identity claim issued by the auth collaborator.
    pub token: String,
    /// Optional human-readable client label for logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// Handshake result, correlated to the handshake request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub success: bool,
    /// Gateway-assigned connection id, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl HandshakeAck {
    pub fn accepted(connection_id: String) -> Self {
        Self {
            success: true,
            connection_id: Some(connection_id),
            error: None,
        }
    }

    pub fn refused(error: CommandError) -> Self {
        Self {
            success: false,
            connection_id: None,
            error: Some(error),
        }
    }
}

/// Mutating auction commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionCommand {
    /// Open the next pending lot for bidding.
    Start,
    /// Explicitly put a specific pending lot on the block.
    SelectLot { lot_id: String },
    /// Bid for a team. TeamReps bid for their own team and must omit
    /// `team_id`; directors bid on a team's behalf and must supply it.
    PlaceBid {
        amount: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        team_id: Option<String>,
    },
    /// Hammer down: award the current lot to the leading team.
    MarkSold,
    /// Pass the current lot permanently.
    MarkUnsold,
    Pause,
    Resume,
    /// Re-attempt the durable write that put the session into Held.
    Retry,
    /// Reload the catalog and restart from Idle.
    Reset,
}

impl AuctionCommand {
    /// Stable name for logs and the authorization table.
    pub fn name(&self) -> &'static str {
        match self {
            AuctionCommand::Start => "start",
            AuctionCommand::SelectLot { .. } => "select_lot",
            AuctionCommand::PlaceBid { .. } => "place_bid",
            AuctionCommand::MarkSold => "mark_sold",
            AuctionCommand::MarkUnsold => "mark_unsold",
            AuctionCommand::Pause => "pause",
            AuctionCommand::Resume => "resume",
            AuctionCommand::Retry => "retry",
            AuctionCommand::Reset => "reset",
        }
    }
}

/// Command with its client-assigned id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Client-generated UUID, echoed back in the response.
    pub command_id: String,
    #[serde(flatten)]
    pub command: AuctionCommand,
}

/// Command response, sent only to the issuing connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// The command ID this responds to.
    pub command_id: String,
    /// Whether the command was accepted.
    pub success: bool,
    /// Session version after the accepted mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Rejection details if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandResponse {
    pub fn success(command_id: String, version: u64) -> Self {
        Self {
            command_id,
            success: true,
            version: Some(version),
            error: None,
        }
    }

    pub fn error(command_id: String, error: CommandError) -> Self {
        Self {
            command_id,
            success: false,
            version: None,
            error: Some(error),
        }
    }
}

/// Command error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandError {
    pub code: CommandErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: CommandErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Command error codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandErrorCode {
    /// Claim invalid or expired; connection-level, never reaches the engine.
    Unauthenticated,
    /// Role or team-ownership mismatch for the command.
    Unauthorized,
    /// Command not valid in the current phase.
    PhaseError,
    BidTooLow,
    InsufficientPurse,
    RosterFull,
    SelfBid,
    /// MarkSold with no leading bid on the block.
    NoLeadingBid,
    UnknownLot,
    UnknownTeam,
    /// Durable write failed; session is Held.
    PersistenceFailed,
    InternalError,
}

/// Current lot as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotView {
    pub id: String,
    pub name: String,
    pub category: String,
    pub nationality: String,
    pub age: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub points: u32,
    pub base_price: u64,
}

impl From<&Lot> for LotView {
    fn from(lot: &Lot) -> Self {
        Self {
            id: lot.id.clone(),
            name: lot.name.clone(),
            category: lot.category.clone(),
            nationality: lot.nationality.clone(),
            age: lot.age,
            image_url: lot.image_url.clone(),
            points: lot.points,
            base_price: lot.base_price,
        }
    }
}

/// Leading team reference in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamRef {
    pub id: String,
    pub short_name: String,
}

/// Per-team summary in the snapshot, leaderboard-ordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamSummary {
    pub id: String,
    pub short_name: String,
    pub purse: u64,
    pub roster_size: u32,
    pub points: u32,
}

impl From<&Team> for TeamSummary {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id.clone(),
            short_name: team.short_name.clone(),
            purse: team.purse,
            roster_size: team.roster_size(),
            points: team.points,
        }
    }
}

/// One accepted bid in the ledger tail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidEntry {
    pub team_id: String,
    pub amount: u64,
    /// Milliseconds since epoch, assigned by the engine on acceptance.
    pub timestamp: i64,
}

/// Versioned full-state snapshot, broadcast on every accepted mutation.
///
/// Clients replace their entire local state with the newest snapshot and
/// discard any snapshot whose version is not greater than the last applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPayload {
    pub version: u64,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_lot: Option<LotView>,
    pub current_bid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading_team: Option<TeamRef>,
    pub teams: Vec<TeamSummary>,
    pub recent_bids: Vec<BidEntry>,
}
