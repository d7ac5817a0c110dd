//! Domain layer - pure types and algorithms with no I/O.
//!
//! - Rule group members, identities, scopes and change tokens
//! - The member codec between activated rules and structured records
//! - The set differ producing ordered mutation batches
//!
//! Everything here is deterministic and tested in isolation.

pub mod codec;
pub mod diff;
pub mod rule;
