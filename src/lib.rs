//! Fan-out cache invalidation for published content.
//!
//! A content change is resolved into the set of stale URLs, then every URL is
//! invalidated on every configured backend: an HTTP edge cache (`PURGE`
//! requests) and a key-value cache (key deletion). Each (URL, backend) pair
//! yields exactly one reported outcome.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod invalidation;
