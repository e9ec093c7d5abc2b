use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A gateway user. Identity is established upstream; the gateway only keeps
/// the attributes that drive credit resolution and pricing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub display_name: Option<String>,
    /// Pricing cohort for the user's personal pool (e.g. "family")
    pub cohort: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUser {
    pub display_name: Option<String>,
    pub cohort: Option<String>,
}
