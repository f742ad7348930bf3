//! HTTP handlers. Each one validates its body, calls a service, and maps the result.

pub mod admin;
pub mod auth;
pub mod two_factor;
pub mod user;
