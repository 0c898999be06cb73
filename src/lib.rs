//! Client-side synchronization for a manga reading platform.
//!
//! Keeps a local query cache in step with the platform's REST API, applies
//! invalidation events pushed over a WebSocket channel and runs comment
//! writes through an optimistic mutation protocol.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod realtime;
