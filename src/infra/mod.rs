//! Infrastructure adapters and runtime bootstrap.

pub mod edge;
pub mod error;
pub mod http;
pub mod kv;
pub mod telemetry;
