//! 拍卖系统共享类型
//!
//! These types are shared between auction-server and clients, for both
//! in-process (tests) and network (TCP) communication.

pub mod message;
pub mod models;
pub mod payload;
pub mod util;

pub use message::{BusMessage, EventType, PROTOCOL_VERSION};
pub use models::{Lot, LotStatus, Phase, Role, Team};
pub use payload::{
    AuctionCommand, BidEntry, CommandEnvelope, CommandError, CommandErrorCode, CommandResponse,
    HandshakeAck, HandshakePayload, LotView, SnapshotPayload, TeamRef, TeamSummary,
};
