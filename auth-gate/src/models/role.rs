//! Role model - a named bundle of permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Role entity. Names are globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: Ulid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(name: String) -> Self {
        Self {
            id: Ulid::new(),
            name,
            created_utc: Utc::now(),
        }
    }
}
