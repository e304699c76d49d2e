//! HTTP integration.
//!
//! [`throttle`] protects an axum router in-process. [`HttpServer`] exposes
//! the same decisions as a standalone service for out-of-process callers.

mod error;
mod handlers;
mod middleware;
mod response;
mod server;
mod state;

pub use error::{ApiError, ApiResult};
pub use handlers::{CheckRequest, CheckResponse};
pub use middleware::throttle;
pub use response::{apply_headers, rejection, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
pub use server::{router, HttpServer};
pub use state::ThrottleState;
