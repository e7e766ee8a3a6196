//! Presentation layer: askama views for random node blocks.

pub mod views;
