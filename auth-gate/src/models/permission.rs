//! Permission model. Names follow the `<action>_<module>` convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub id: Ulid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

impl Permission {
    pub fn new(name: String) -> Self {
        Self {
            id: Ulid::new(),
            name,
            created_utc: Utc::now(),
        }
    }

    /// Build the conventional permission name for an action on a module.
    pub fn name_for(action: PolicyAction, module: &str) -> String {
        format!("{}_{}", action.as_str(), module)
    }
}

/// Standard CRUD-style actions checked by the policy helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    View,
    Create,
    Edit,
    Delete,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::View => "view",
            PolicyAction::Create => "create",
            PolicyAction::Edit => "edit",
            PolicyAction::Delete => "delete",
        }
    }
}
