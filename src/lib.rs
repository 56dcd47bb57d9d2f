//! # Vexis Hub Backend Library
//!
//! Vexis Hub is an internal-management backend for small businesses: tasks, leads, clients,
//! projects, financial records and webhooks, with role-based access, API keys, notifications
//! and reports, served as a JSON API.
//!
//! ## Architecture
//!
//! The application is built using:
//! - **Axum**: HTTP server and routing
//! - **SQLx**: Asynchronous database operations with SQLite
//! - **Tokio**: Async runtime and the rate-limit sweep task
//! - **Serde**: Serialization/deserialization for JSON APIs
//!
//! Every API handler runs the same guard pipeline before touching data:
//! rate limit (per IP) → authenticate → rate limit (per user) → sanitize → validate →
//! CRUD → audit. Security headers are added to every response by a router layer.
//!
//! ## Core Components
//!
//! - [`config`]: Layered configuration (embedded defaults, files, environment)
//! - [`db`]: Schema initialization
//! - [`error`]: Error taxonomy and the JSON error envelope
//! - [`schema`]: Per-entity field schemas driving validation and persistence
//! - [`records`]: Owner-scoped CRUD over the entity tables
//! - [`accounts`]: Users, sessions, API keys, preferences
//! - [`notifications`]: In-app notifications
//! - [`middleware`]: The guard pipeline stages
//! - [`routes`]: HTTP handlers and the router
//! - [`metrics`]: Guard outcome counters
//! - [`state`]: Shared application state

pub mod accounts;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod notifications;
pub mod records;
pub mod routes;
pub mod schema;
pub mod state;

#[cfg(test)]
mod tests;
