//! Time-slice rate limiting logic and state management.

mod limiter;
mod naming;
mod window;

pub use limiter::{QuotaStatus, SliceLimiter};
pub use naming::{HttpRemoteNamer, DEFAULT_IPV6_BITS, FORWARDED_FOR_HEADER};
pub use window::Window;
