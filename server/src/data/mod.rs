//! Data layer
//!
//! - `broker` - durable subject-addressed broker (memory and Redis backends)

pub mod broker;
