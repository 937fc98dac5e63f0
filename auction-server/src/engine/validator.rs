//! Command validation
//!
//! Pure decision logic over the current session: given an authorized
//! command and the caller's identity, accept or reject. No IO, no
//! mutation; everything the engine worker applies afterwards was decided
//! here first.

use shared::{AuctionCommand, CommandError, CommandErrorCode, Phase, Role};

use crate::auth::ClientIdentity;

use super::session::AuctionSession;

/// Tiered bid increments: (exclusive upper bound of the current bid,
/// increment). Coarser steps at higher bid levels.
pub const INCREMENT_TIERS: &[(u64, u64)] = &[
    (10_000_000, 500_000),
    (20_000_000, 1_000_000),
    (30_000_000, 2_000_000),
    (50_000_000, 2_500_000),
];

/// Increment above the last tier.
pub const TOP_INCREMENT: u64 = 5_000_000;

/// Minimum raise over the given bid. Monotonically non-decreasing in `bid`.
pub fn increment_for(bid: u64) -> u64 {
    INCREMENT_TIERS
        .iter()
        .find(|(max, _)| bid < *max)
        .map(|(_, step)| *step)
        .unwrap_or(TOP_INCREMENT)
}

/// Lowest acceptable bid for the lot on the block: the opening price while
/// the floor is free, otherwise the current bid plus one increment.
pub fn min_accept(session: &AuctionSession) -> Option<u64> {
    let lot = session.current_lot()?;
    Some(match session.leading_team() {
        None => lot.base_price,
        Some(_) => session.current_bid() + increment_for(session.current_bid()),
    })
}

/// Resolve which team a bid acts for. TeamReps bid implicitly for their
/// own team (the authorization step already rejected mismatches);
/// directors must name one.
pub fn resolve_bidder(
    identity: &ClientIdentity,
    team_id: &Option<String>,
) -> Result<String, CommandError> {
    if identity.role == Role::TeamRep {
        return identity.team_id.clone().ok_or_else(|| {
            CommandError::new(CommandErrorCode::Unauthorized, "claim carries no team binding")
        });
    }
    team_id.clone().ok_or_else(|| {
        CommandError::new(
            CommandErrorCode::UnknownTeam,
            "a director's bid must name a team",
        )
    })
}

fn phase_error(message: impl Into<String>) -> CommandError {
    CommandError::new(CommandErrorCode::PhaseError, message)
}

/// Validate an authorized command against the current session state.
pub fn validate(
    session: &AuctionSession,
    command: &AuctionCommand,
    identity: &ClientIdentity,
    roster_cap: u32,
) -> Result<(), CommandError> {
    let phase = session.phase();
    match command {
        AuctionCommand::Start => {
            if !matches!(phase, Phase::Idle | Phase::Completed) {
                return Err(phase_error(format!("cannot start from {:?}", phase)));
            }
            if session.remaining_is_empty() {
                return Err(phase_error("no pending lots remain"));
            }
            Ok(())
        }

        AuctionCommand::SelectLot { lot_id } => {
            if !matches!(phase, Phase::LotActive | Phase::Paused) {
                return Err(phase_error(format!("cannot select a lot from {:?}", phase)));
            }
            match session.lot(lot_id) {
                None => Err(CommandError::new(
                    CommandErrorCode::UnknownLot,
                    format!("no such lot: {}", lot_id),
                )),
                Some(lot) if !lot.is_pending() => Err(CommandError::new(
                    CommandErrorCode::UnknownLot,
                    format!("lot {} is already finalized", lot_id),
                )),
                Some(_) => Ok(()),
            }
        }

        AuctionCommand::PlaceBid { amount, team_id } => {
            match phase {
                Phase::LotActive => {}
                Phase::Paused => return Err(phase_error("bidding is paused")),
                other => return Err(phase_error(format!("no lot is open in {:?}", other))),
            }

            let bidder = resolve_bidder(identity, team_id)?;
            let team = session.team(&bidder).ok_or_else(|| {
                CommandError::new(
                    CommandErrorCode::UnknownTeam,
                    format!("no such team: {}", bidder),
                )
            })?;

            if session.leading_team() == Some(bidder.as_str()) {
                return Err(CommandError::new(
                    CommandErrorCode::SelfBid,
                    "team already holds the leading bid",
                ));
            }

            if team.roster_size() >= roster_cap {
                return Err(CommandError::new(
                    CommandErrorCode::RosterFull,
                    format!("squad limit of {} reached", roster_cap),
                ));
            }

            let floor = min_accept(session).expect("LotActive implies an armed lot");
            if *amount < floor {
                return Err(CommandError::new(
                    CommandErrorCode::BidTooLow,
                    format!("minimum accepted bid is {}", floor),
                ));
            }

            if team.purse < *amount {
                return Err(CommandError::new(
                    CommandErrorCode::InsufficientPurse,
                    format!("purse {} cannot cover bid {}", team.purse, amount),
                ));
            }

            Ok(())
        }

        AuctionCommand::MarkSold => {
            if phase != Phase::LotActive {
                return Err(phase_error(format!("cannot finalize from {:?}", phase)));
            }
            if session.leading_team().is_none() {
                return Err(CommandError::new(
                    CommandErrorCode::NoLeadingBid,
                    "no bid to hammer down",
                ));
            }
            Ok(())
        }

        AuctionCommand::MarkUnsold => {
            if phase != Phase::LotActive {
                return Err(phase_error(format!("cannot finalize from {:?}", phase)));
            }
            Ok(())
        }

        AuctionCommand::Pause => {
            if phase != Phase::LotActive {
                return Err(phase_error(format!("cannot pause from {:?}", phase)));
            }
            Ok(())
        }

        AuctionCommand::Resume => {
            if phase != Phase::Paused {
                return Err(phase_error(format!("cannot resume from {:?}", phase)));
            }
            Ok(())
        }

        AuctionCommand::Retry => {
            if phase != Phase::Held {
                return Err(phase_error("nothing to retry, session is not held"));
            }
            Ok(())
        }

        // Operators may always collapse back to Idle.
        AuctionCommand::Reset => Ok(()),
    }
}
