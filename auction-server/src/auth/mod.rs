//! Authentication and authorization
//!
//! The gateway verifies a pre-issued claim ([`jwt`]); the engine authorizes
//! each command against the role table ([`roles`]). Identities are never
//! issued or stored here.

pub mod jwt;
pub mod roles;

pub use jwt::{Claims, JwtConfig, JwtError, JwtService};
pub use roles::{RoleRequirement, authorize};

use shared::Role;

/// Verified identity attached to a connection for its whole lifetime.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub subject: String,
    pub name: String,
    pub role: Role,
    /// Bound team, present iff `role == TeamRep`.
    pub team_id: Option<String>,
}

impl From<Claims> for ClientIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            name: claims.name,
            role: claims.role,
            team_id: claims.team_id,
        }
    }
}
