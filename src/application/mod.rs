//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic against the remote service:
//! - Token retry loop (fresh tokens, backoff, timeout, cancellation)
//! - Rule group reconciler (create, read, update, delete)
//! - Metrics
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod metrics;
pub mod ports;
pub mod reconciler;
pub mod retryer;
