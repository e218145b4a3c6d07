//! # gandi-core
//!
//! Core types and utilities for working with the Gandi hosting API.
//!
//! This crate provides the shared error type, the remote value model, typed
//! identifiers and configuration used by the gateway and the object mapper.
//!
//! ## Modules
//!
//! - [`error`] - Error types and HTTP status code mapping
//! - [`value`] - Raw XML-RPC values and records
//! - [`ids`] - Strongly-typed identifiers for hosting resources
//! - [`types`] - Entity kinds, operation steps and VM states
//! - [`config`] - Configuration file loading for hosting clients
//! - [`client`] - HTTP client settings and default timeouts

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod ids;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{EntityKind, Step, VmState};
pub use value::{Record, Value};
