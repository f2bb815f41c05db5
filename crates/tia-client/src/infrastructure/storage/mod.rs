//! Storage infrastructure.

pub mod config;
