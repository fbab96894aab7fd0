//! Event envelope and payload schema definitions shared by every fabric crate.
//!
//! `fabric-types` has no knowledge of transport, persistence, or resilience —
//! it only knows how to construct, validate, and describe envelopes. Every
//! other crate in the workspace depends on it and nothing else depends on
//! them.

mod envelope;
mod schema;

pub use envelope::{Envelope, EntityType, Source};
pub use schema::{validate, SchemaError};

/// Re-exported so downstream crates don't need a direct `serde_json` dependency
/// just to build `data` payloads.
pub use serde_json::{json, Value};
