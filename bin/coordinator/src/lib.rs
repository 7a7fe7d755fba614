//! flotilla coordinator.
//!
//! The process every fleet member registers with on boot. It keeps the
//! service catalog, sweeps health endpoints on a timer and answers discovery
//! queries over a small JSON API.

pub mod config;
pub mod error;
pub mod events;
pub mod routes;
