//! Credit resolution and spend authorization.
//!
//! Per request the gateway resolves exactly one authoritative pool
//! ([`CreditResolver::resolve`]), estimates the cost ([`estimate_spend`]) and
//! checks whether the pool can absorb it ([`can_spend`]). Nothing is reserved:
//! two concurrent requests may both pass against the same balance and both
//! settle. The ledger's balance guard still refuses any single debit that
//! would take a pool below zero.

mod authorization;
mod estimate;
mod resolver;

pub use authorization::{SpendDecision, SpendDenial, can_spend};
pub use estimate::{SpendEstimate, estimate_spend};
pub use resolver::{ApplicableCaps, CreditResolver, ResolvedSpend};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DbError;

/// Which pool a request must draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendContext {
    /// Organization membership decides between the organization and personal pool
    Auto,
    /// The request belongs to a class conversation
    Class(Uuid),
}

impl SpendContext {
    pub fn from_class_id(class_id: Option<Uuid>) -> Self {
        class_id.map_or(Self::Auto, Self::Class)
    }
}

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("User is not an active member of class {0}")]
    NotClassMember(Uuid),

    #[error("Credit ledger error: {0}")]
    Db(#[from] DbError),
}
