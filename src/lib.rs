//! Stream Relay - HLS relay with rotating egress
//!
//! Fetches playlists and segments on behalf of web players and rewrites
//! playlists so every follow-up request comes back through the relay.
//!
//! ## Features
//!
//! - Pool of outbound proxies with sticky sessions, health probing and
//!   per-path concurrency accounting
//! - Bounded retries rotating browser identities on blocked responses
//! - Manifest rewriting for segments, variants, keys and init maps
//! - Streaming segment passthrough with Range support

pub mod api;
pub mod config;
pub mod error;
pub mod manifest;
pub mod models;
pub mod proxy;

pub use config::Config;
pub use error::{RelayError, Result};
