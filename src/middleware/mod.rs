//! The request-guard pipeline and its stages.
//!
//! [`guard::Guard`] strings the stages together for each handler: per-IP and per-user rate
//! limiting, authentication, body sanitizing and validation, and the closing audit entry.
//! [`security_headers`] is the only piece applied as a router layer.

pub mod audit;
pub mod auth;
pub mod guard;
pub mod ip;
pub mod rate_limit;
pub mod sanitize;
pub mod security_headers;
pub mod validation;
