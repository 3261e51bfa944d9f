//! cacheboot Common - Shared types and utilities
//!
//! This crate provides the types exchanged between cluster members during a
//! cache bootstrap, the bootstrap configuration and the common error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BootstrapConfig, Config, NodeConfig};
pub use error::{Error, Result};
pub use types::*;
