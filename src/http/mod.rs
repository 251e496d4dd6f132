//! HTTP front end enforcing time-slice quotas per client.
//!
//! The service is meant to sit behind a reverse proxy's sub-request hook
//! (e.g. `auth_request`): any path answers `200` while the caller is within
//! budget and `429` once it is over.

mod middleware;
mod server;
mod service;

pub use middleware::{
    enforce_quota, RATELIMIT_LIMIT_HEADER, RATELIMIT_REMAINING_HEADER, RATELIMIT_RESET_HEADER,
};
pub use server::HttpServer;
pub use service::{router, AppState, QuotaResponse};
