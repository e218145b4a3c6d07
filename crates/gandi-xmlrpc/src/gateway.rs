//! Remote call abstraction.

use crate::Result;
use async_trait::async_trait;
use gandi_core::Value;

/// Issues authenticated calls against the hosting API.
///
/// Method names are dot-qualified (`vm.list`, `disk.info`, `account.info`).
/// Implementations prepend the credential to `args`; callers never pass it.
/// Transport failures and remote faults are returned unmodified and are never
/// retried.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Call `method` with `args` and return the raw result.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value>;
}
