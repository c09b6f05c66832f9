//! Relay HTTP surface
//!
//! Manifest, segment, asset, health and status endpoints.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod validate;

pub use server::{AppState, RelayServer};
