//! Command authorization
//!
//! One table decides which role may issue which command, replacing per-
//! handler role checks. Team ownership for bids is part of the same
//! decision: a TEAM_REP may only ever act for the team in its claim.

use shared::{AuctionCommand, CommandError, CommandErrorCode, Role};

use super::ClientIdentity;

/// Minimum role a command requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleRequirement {
    /// Any authenticated connection.
    Any,
    /// Operator or Presenter.
    Director,
    /// Operator only.
    Operator,
}

/// Authorization table, keyed by [`AuctionCommand::name`].
pub const COMMAND_RULES: &[(&str, RoleRequirement)] = &[
    ("start", RoleRequirement::Director),
    ("select_lot", RoleRequirement::Director),
    ("place_bid", RoleRequirement::Any),
    ("mark_sold", RoleRequirement::Director),
    ("mark_unsold", RoleRequirement::Director),
    ("pause", RoleRequirement::Director),
    ("resume", RoleRequirement::Director),
    ("retry", RoleRequirement::Operator),
    ("reset", RoleRequirement::Operator),
];

fn requirement_for(command: &AuctionCommand) -> RoleRequirement {
    COMMAND_RULES
        .iter()
        .find(|(name, _)| *name == command.name())
        .map(|(_, req)| *req)
        // Unlisted commands default to the strictest requirement.
        .unwrap_or(RoleRequirement::Operator)
}

fn satisfies(role: Role, requirement: RoleRequirement) -> bool {
    match requirement {
        RoleRequirement::Any => true,
        RoleRequirement::Director => role.is_director(),
        RoleRequirement::Operator => role == Role::Operator,
    }
}

/// Check role and team ownership for a command. Never mutates anything.
pub fn authorize(command: &AuctionCommand, identity: &ClientIdentity) -> Result<(), CommandError> {
    let requirement = requirement_for(command);
    if !satisfies(identity.role, requirement) {
        return Err(CommandError::new(
            CommandErrorCode::Unauthorized,
            format!(
                "role {:?} may not issue {}",
                identity.role,
                command.name()
            ),
        ));
    }

    // A TEAM_REP bids for its own team only; naming another team (or having
    // no team bound to the claim) is an authorization failure, not a
    // validation one.
    if let AuctionCommand::PlaceBid { team_id, .. } = command
        && identity.role == Role::TeamRep
    {
        match (&identity.team_id, team_id) {
            (None, _) => {
                return Err(CommandError::new(
                    CommandErrorCode::Unauthorized,
                    "claim carries no team binding",
                ));
            }
            (Some(own), Some(requested)) if own != requested => {
                return Err(CommandError::new(
                    CommandErrorCode::Unauthorized,
                    "cannot bid on behalf of another team",
                ));
            }
            _ => {}
        }
    }

    Ok(())
}
