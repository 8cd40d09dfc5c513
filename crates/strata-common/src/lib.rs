//! Strata Common - Shared types and utilities
//!
//! This crate provides the core types, error definitions, checksums, and
//! cluster configuration used across all Strata components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod msg;
pub mod types;

pub use checksum::{Checksum, ChecksumCalculator, ChecksumType};
pub use config::Config;
pub use error::{Error, Result};
pub use msg::{Action, ActionMsg};
pub use types::*;
