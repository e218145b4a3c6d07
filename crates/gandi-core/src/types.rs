//! Core hosting domain types.
//!
//! This module provides the closed set of entity kinds exposed by the hosting
//! API, the progress steps reported by asynchronous operations and the states a
//! virtual machine can be in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Kinds of remote objects exposed by the hosting API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Datacenter
    Datacenter,
    /// Disk image
    Image,
    /// Virtual machine
    Vm,
    /// Virtual disk
    Disk,
    /// Network interface
    Iface,
    /// IP address
    Ip,
    /// Asynchronous operation
    Operation,
    /// Billed product
    Product,
    /// Resource counters of the account
    Resource,
    /// Account
    Account,
}

impl EntityKind {
    /// Returns the kind name as used in remote method names.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Datacenter => "datacenter",
            Self::Image => "image",
            Self::Vm => "vm",
            Self::Disk => "disk",
            Self::Iface => "iface",
            Self::Ip => "ip",
            Self::Operation => "operation",
            Self::Product => "product",
            Self::Resource => "resource",
            Self::Account => "account",
        }
    }

    /// Returns the pluralized name used for collection accessors.
    #[must_use]
    pub const fn plural(&self) -> &'static str {
        match self {
            Self::Datacenter => "datacenters",
            Self::Image => "images",
            Self::Vm => "vms",
            Self::Disk => "disks",
            Self::Iface => "ifaces",
            Self::Ip => "ips",
            Self::Operation => "operations",
            Self::Product => "products",
            Self::Resource => "resources",
            Self::Account => "accounts",
        }
    }

    /// Returns all kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Datacenter,
            Self::Image,
            Self::Vm,
            Self::Disk,
            Self::Iface,
            Self::Ip,
            Self::Operation,
            Self::Product,
            Self::Resource,
            Self::Account,
        ]
    }

    /// Returns the kinds that have a collection built from `<kind>.list`.
    #[must_use]
    pub const fn listed() -> &'static [Self] {
        &[
            Self::Datacenter,
            Self::Image,
            Self::Vm,
            Self::Disk,
            Self::Iface,
            Self::Ip,
        ]
    }

    /// Returns true if the kind has a collection.
    #[must_use]
    pub fn is_listed(&self) -> bool {
        Self::listed().contains(self)
    }

    /// Finds a listed kind by its singular name.
    #[must_use]
    pub fn listed_by_name(name: &str) -> Option<Self> {
        Self::listed().iter().copied().find(|kind| kind.name() == name)
    }

    /// Finds a listed kind by its plural name.
    #[must_use]
    pub fn listed_by_plural(plural: &str) -> Option<Self> {
        Self::listed()
            .iter()
            .copied()
            .find(|kind| kind.plural() == plural)
    }

    /// Builds a dot-qualified remote method name, e.g. `vm.create`.
    #[must_use]
    pub fn method(&self, verb: &str) -> String {
        format!("{}.{verb}", self.name())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == lowered)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown entity kind: {s}")))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Progress step of an asynchronous operation.
///
/// `DONE` and `ERROR` are terminal. Every other value reported by the service
/// is carried verbatim in [`Step::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Operation completed successfully
    Done,
    /// Operation failed
    Error,
    /// Any non-terminal step (`BILL`, `WAIT`, `RUN`, ...)
    Other(String),
}

impl Step {
    /// Returns true for `DONE` and `ERROR`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Returns true only for `DONE`.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns the remote representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Other(step) => step,
        }
    }
}

impl From<&str> for Step {
    fn from(s: &str) -> Self {
        match s {
            "DONE" => Self::Done,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VmState {
    /// Paused
    Paused,
    /// Running
    Running,
    /// Halted
    Halted,
    /// Locked by an operation in progress
    Locked,
    /// Still being provisioned
    BeingCreated,
    /// Invalid
    Invalid,
    /// Locked for legal reasons
    LegallyLocked,
    /// Deleted
    Deleted,
    /// State not known to this library
    Unknown(String),
}

impl VmState {
    /// Returns the remote representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Paused => "paused",
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Locked => "locked",
            Self::BeingCreated => "being_created",
            Self::Invalid => "invalid",
            Self::LegallyLocked => "legally_locked",
            Self::Deleted => "deleted",
            Self::Unknown(state) => state,
        }
    }

    /// Returns true for states in which the VM is usable.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::BeingCreated | Self::Halted | Self::Running)
    }
}

impl From<&str> for VmState {
    fn from(s: &str) -> Self {
        match s {
            "paused" => Self::Paused,
            "running" => Self::Running,
            "halted" => Self::Halted,
            "locked" => Self::Locked,
            "being_created" => Self::BeingCreated,
            "invalid" => Self::Invalid,
            "legally_locked" => Self::LegallyLocked,
            "deleted" => Self::Deleted,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
