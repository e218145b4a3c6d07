//! Object mapper over the Gandi hosting API.
//!
//! Raw records returned by the [`Gateway`] are wrapped into shared
//! [`Entity`] handles, cached per kind in a [`Collection`] and linked to each
//! other lazily through their `*_id` fields. Mutations return an
//! [`Operation`] that is polled until it reaches `DONE` or `ERROR`.
//!
//! ```no_run
//! # async fn demo() -> gandi_core::Result<()> {
//! use gandi_hosting::Hosting;
//!
//! let mut hosting = Hosting::from_config("hosting.toml")?;
//! let vm = hosting.vms().await?.find(&"web01".into()).cloned();
//! if let Some(vm) = vm {
//!     let step = hosting.set(&vm, "memory", 1024.into()).await?;
//!     println!("{vm}: {step}");
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod account;
pub mod collection;
pub mod entity;
pub mod hosting;
pub mod operation;
pub mod schema;

#[cfg(test)]
mod test_support;

pub use account::Account;
pub use collection::{Collection, Lookup, Selection};
pub use entity::{Access, Cardinality, Entity, EntityRef, Property, Relation};
pub use hosting::{Created, Hosting};
pub use operation::{Operation, OperationLog, DEFAULT_POLL_INTERVAL};
pub use schema::{schema_for, Requirement, Schema};

pub use gandi_xmlrpc::Gateway;

/// Convenient result alias sharing the `gandi-core` error type.
pub type Result<T> = gandi_core::Result<T>;
