//! Rate limiting logic and state management.

mod backend;
mod decision;
mod distributed;
mod entry;
mod key;
mod limiter;
mod policy;
mod sweeper;

pub use backend::RateLimitBackend;
pub use decision::Decision;
pub use distributed::DistributedRateLimiter;
pub use entry::RateLimitEntry;
pub use key::{client_identity, RequestKey, UNKNOWN_CLIENT};
pub use limiter::RateLimiter;
pub use policy::{PolicyTable, RateLimitConfig, RouteRule, DEFAULT_MESSAGE};
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};
