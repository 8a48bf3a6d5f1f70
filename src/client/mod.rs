//! Resource transport consumed by the request cache
//!
//! freshgate never talks to the network itself; applications hand it a
//! [`ResourceApi`] implementation and the cache layers on top.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

#[cfg(test)]
pub mod mock;

#[cfg(test)]
pub use mock::MockResourceApi;

/// Kind of mutating request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteMethod::Post => "POST",
            WriteMethod::Put => "PUT",
            WriteMethod::Patch => "PATCH",
            WriteMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Resource-oriented transport
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Read `resource` with the given query parameters
    async fn read(&self, resource: &str, params: &[(&str, &str)]) -> Result<serde_json::Value>;

    /// Mutate `resource` (optionally a single item by id)
    async fn write(
        &self,
        method: WriteMethod,
        resource: &str,
        id: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}
