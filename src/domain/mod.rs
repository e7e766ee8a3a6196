//! Domain layer types and invariants.

pub mod draw;
pub mod entities;
pub mod error;
pub mod types;
