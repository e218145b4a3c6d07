//! XML-RPC gateway for the Gandi hosting API.
//!
//! [`Gateway`] is the single point of contact with the remote service. The
//! [`XmlRpcClient`] implementation speaks XML-RPC over HTTPS and injects the
//! API key as the first argument of every call.

#![deny(missing_docs)]

pub mod client;
pub mod codec;
pub mod gateway;

pub use client::{XmlRpcClient, XmlRpcClientBuilder};
pub use codec::{decode_response, encode_call};
pub use gateway::Gateway;

/// Convenient result alias sharing the `gandi-core` error type.
pub type Result<T> = gandi_core::Result<T>;
