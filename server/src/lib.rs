//! HTTP bridge onto a durable, subject-addressed pub/sub broker
//!
//! - `PUT /?topic=<t>` publishes the request body under a topic
//! - `GET /?topic=<t>` returns at most one pending message for a topic,
//!   acknowledged before it is returned
//!
//! Storage units and cursors are provisioned on demand.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
