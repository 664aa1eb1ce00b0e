pub mod auth;
pub mod error_handling;
pub mod metrics;

pub use auth::{JwtAuthMiddleware, UserId};
pub use metrics::MetricsMiddleware;
