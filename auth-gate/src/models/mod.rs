pub mod identity;
pub mod permission;
pub mod role;

pub use identity::{Identity, ResolvedIdentity, ResolvedRole};
pub use permission::{Permission, PolicyAction};
pub use role::Role;
