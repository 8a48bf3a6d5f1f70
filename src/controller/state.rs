//! Consumer-facing snapshot of one resource

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Error;

/// What a consumer sees for one resource.
///
/// `loading` starts out true and stays true only while a fetch is in
/// flight. `error` is set only when a fetch failed and no fallback exists.
#[derive(Debug, Clone)]
pub struct ResourceState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<Arc<Error>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<T> ResourceState<T> {
    /// Optimistic state before the first resolution
    pub fn pending() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
            last_updated: None,
            is_stale: false,
        }
    }

    /// Loading with nothing to show yet
    pub fn is_initial_load(&self) -> bool {
        self.loading && self.data.is_none()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
