//! Slicelimit - Time-Slice Rate Limiting
//!
//! This crate limits how many operations each client identifier may perform
//! per fixed time slice. Budgets are tracked in memory by [`SliceLimiter`],
//! which reclaims expired state on a background thread that only runs while
//! something is being tracked. An axum front end names clients by their
//! network address and enforces the limit per request.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use ratelimit::{HttpRemoteNamer, QuotaStatus, SliceLimiter};
