//! # dirops-core
//!
//! Core types and utilities shared by the directory operations crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy surfaced to front-ends
//! - [`config`] - Directory, connection and logging configuration
//! - [`credential`] - Pre-validated bind credentials
//! - [`ids`] - Strongly-typed identifiers for sessions and audit events

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credential;
pub mod error;
pub mod ids;

// Re-export commonly used types
pub use error::{ConnectFailure, Error, ModifyFailure, Result};
