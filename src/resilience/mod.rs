//! Resilience primitives shared by the provider harness and the engines.

pub mod rate_limit;
pub mod retry;

pub use rate_limit::{RateLimitInfo, RateLimiter};
pub use retry::{with_jitter, RetryDecision, RetryFailure, RetryPolicy, RetryStrategy};
