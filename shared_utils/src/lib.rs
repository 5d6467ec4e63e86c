//! Small helpers shared by the workspace crates.

pub mod config;
pub mod env;
