//! Application services layer.

pub mod error;
pub mod extension;
pub mod random_nodes;
pub mod render;
pub mod repos;
pub mod sampler;
