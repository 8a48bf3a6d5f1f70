//! Mock resource transport for testing
//!
//! Serves canned responses per resource and counts calls so tests can check
//! whether the cache answered or the transport did.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ResourceApi, WriteMethod};
use crate::error::{Error, Result};

/// Mock transport.
///
/// # Example
/// ```ignore
/// let mock = MockResourceApi::new()
///     .with_response("rooms", json!([{"id": 1}]))
///     .await;
///
/// let rooms = mock.read("rooms", &[]).await?;
/// ```
#[derive(Default)]
pub struct MockResourceApi {
    /// Responses returned from `read`, keyed by resource
    responses: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    /// Error to return (if any) - consumed on first use
    error: Arc<Mutex<Option<Error>>>,
    /// Track number of calls for verification
    call_count: Arc<Mutex<CallCounts>>,
    /// Captured writes for test assertions
    captured_writes: Arc<Mutex<Vec<CapturedWrite>>>,
}

/// Tracks transport call counts for test verification
#[derive(Default, Debug, Clone)]
pub struct CallCounts {
    pub reads: HashMap<String, usize>,
    pub writes: usize,
}

impl CallCounts {
    /// Reads issued for one resource
    pub fn reads_of(&self, resource: &str) -> usize {
        self.reads.get(resource).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.reads.values().sum::<usize>() + self.writes
    }
}

/// A captured write for test assertions
#[derive(Debug, Clone)]
pub struct CapturedWrite {
    pub method: WriteMethod,
    pub resource: String,
    pub id: Option<String>,
    pub body: serde_json::Value,
}

impl MockResourceApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the value `read(resource)` returns
    pub async fn with_response(self, resource: &str, value: serde_json::Value) -> Self {
        self.responses
            .lock()
            .await
            .insert(resource.to_string(), value);
        self
    }

    /// Replace a response after construction
    pub async fn set_response(&self, resource: &str, value: serde_json::Value) {
        self.responses
            .lock()
            .await
            .insert(resource.to_string(), value);
    }

    /// Configure an error to return on the next call.
    /// The error is consumed after one use.
    pub async fn with_error(self, error: Error) -> Self {
        *self.error.lock().await = Some(error);
        self
    }

    pub async fn call_counts(&self) -> CallCounts {
        self.call_count.lock().await.clone()
    }

    pub async fn captured_writes(&self) -> Vec<CapturedWrite> {
        self.captured_writes.lock().await.clone()
    }

    async fn check_error(&self) -> Result<()> {
        match self.error.lock().await.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceApi for MockResourceApi {
    async fn read(&self, resource: &str, _params: &[(&str, &str)]) -> Result<serde_json::Value> {
        {
            let mut counts = self.call_count.lock().await;
            *counts.reads.entry(resource.to_string()).or_default() += 1;
        }
        self.check_error().await?;

        let responses = self.responses.lock().await;
        responses
            .get(resource)
            .cloned()
            .ok_or_else(|| Error::fetch(format!("no such resource: {}", resource)))
    }

    async fn write(
        &self,
        method: WriteMethod,
        resource: &str,
        id: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.call_count.lock().await.writes += 1;
        self.check_error().await?;

        self.captured_writes.lock().await.push(CapturedWrite {
            method,
            resource: resource.to_string(),
            id: id.map(|s| s.to_string()),
            body: body.clone(),
        });

        Ok(body.clone())
    }
}
