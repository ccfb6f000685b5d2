//! CLI command implementations.

pub mod links;
pub mod migrate;
pub mod seed;
