//! Gate services: tokens, authorization, second factor, throttling, and the
//! account flows built on them.

pub mod account;
pub mod authz;
pub mod email;
pub mod error;
pub mod rate_limiter;
pub mod seed;
pub mod token;
pub mod two_factor;

pub use account::AccountService;
pub use authz::AuthorizationEngine;
pub use email::{EmailProvider, LogEmailProvider};
pub use error::GateError;
pub use rate_limiter::{RateLimiter, Scope};
pub use token::{Claims, IssuedToken, TokenService};
pub use two_factor::{TwoFactorService, TwoFactorSetup};
