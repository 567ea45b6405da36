//! HTTP client module
//!
//! Provides the HTTP client with retry, rate limiting, and backoff strategies.
//!
//! # Features
//!
//! - **Automatic Retries**: bounded retries with configurable backoff
//! - **Rate Limiting**: sliding-window admission per endpoint class
//! - **429 Handling**: fixed backoff or `Retry-After`, bounded separately

mod client;
mod rate_limit;

pub use client::{HttpClient, HttpClientConfig, HttpClientConfigBuilder, RequestConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig, RateWindowConfig};
