//! Request orchestration for a feed dashboard: per-service rate limiting,
//! worker pools, fallback chains, caching and metrics in front of a set of
//! third-party API clients.

pub mod cache;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod rate_limit;
pub mod state;
pub mod widget;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use error::{GatewayError, Result};
