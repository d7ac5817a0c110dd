//! Mock implementations for testing.
//!
//! Test doubles for the infrastructure adapters: a virtual clock, a
//! fault-injecting service wrapper and a log capturing layer.

pub mod api;
pub mod clock;
pub mod layer;

pub use api::FaultInjectingApi;
pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
