//! Tombola: cached random content blocks.
//!
//! Draws bounded sets of random nodes from a Postgres store, avoids repeats
//! within a render session, honours per-bundle quotas, caches the drawn
//! identifiers and renders them through a deferred two-phase pipeline.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
pub mod util;
