use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Permission, Role};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Name is required"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 64, message = "Name is required"))]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct NamedEntityResponse {
    pub id: String,
    pub name: String,
}

impl From<Role> for NamedEntityResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id.to_string(),
            name: role.name,
        }
    }
}

impl From<Permission> for NamedEntityResponse {
    fn from(permission: Permission) -> Self {
        Self {
            id: permission.id.to_string(),
            name: permission.name,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignRoleRequest {
    #[validate(length(equal = 26, message = "Identity id must be a ULID"))]
    pub identity_id: String,

    #[validate(length(min = 1, message = "Role name is required"))]
    pub role_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignPermissionRequest {
    #[validate(length(min = 1, message = "Role name is required"))]
    pub role_name: String,

    #[validate(length(min = 1, message = "Permission name is required"))]
    pub permission_name: String,
}
