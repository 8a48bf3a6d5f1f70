//! Cached wrapper for a resource transport
//!
//! Reads go through the shared [`CacheStore`]; successful writes invalidate
//! the written resource's family and every family related to it.

use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::key::{KEY_PREFIX, cache_key};
use crate::cache::{CacheStats, CacheStore};
use crate::client::{ResourceApi, WriteMethod};
use crate::error::Result;

/// Which resource families a write to a resource makes stale.
///
/// A write to `room` always invalidates `room*`; `relate("room", ["inventory"])`
/// additionally invalidates `inventory*`.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    related: HashMap<String, Vec<String>>,
}

impl InvalidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relate<I, S>(mut self, resource: &str, related: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related
            .entry(resource.to_string())
            .or_default()
            .extend(related.into_iter().map(Into::into));
        self
    }

    /// The resource itself followed by its related families
    pub fn families_for(&self, resource: &str) -> Vec<String> {
        let mut families = vec![resource.to_string()];
        if let Some(related) = self.related.get(resource) {
            for family in related {
                if !families.contains(family) {
                    families.push(family.clone());
                }
            }
        }
        families
    }

    /// One pattern matching every key in the given families
    pub fn pattern_for(families: &[String]) -> Result<Regex> {
        let alternatives: Vec<String> = families.iter().map(|f| regex::escape(f)).collect();
        let source = format!(
            "^{}(?:{})",
            regex::escape(KEY_PREFIX),
            alternatives.join("|")
        );
        Ok(Regex::new(&source)?)
    }
}

impl From<HashMap<String, Vec<String>>> for InvalidationRules {
    fn from(related: HashMap<String, Vec<String>>) -> Self {
        Self { related }
    }
}

/// Cached wrapper for any [`ResourceApi`] implementation.
///
/// Caching can be bypassed (the `--no-cache` analogue); writes still
/// invalidate, since the store may be shared with other readers.
pub struct RequestCache<C: ResourceApi> {
    inner: Arc<C>,
    cache: Arc<CacheStore>,
    rules: InvalidationRules,
    ttl_overrides: HashMap<String, Duration>,
    bypass: bool,
}

impl<C: ResourceApi> RequestCache<C> {
    /// Wrap `inner`, caching into `cache`
    pub fn new(inner: C, cache: Arc<CacheStore>) -> Self {
        Self {
            inner: Arc::new(inner),
            cache,
            rules: InvalidationRules::default(),
            ttl_overrides: HashMap::new(),
            bypass: false,
        }
    }

    pub fn with_rules(mut self, rules: InvalidationRules) -> Self {
        self.rules = rules;
        self
    }

    /// TTL for one resource family, overriding the store default
    pub fn with_ttl(mut self, resource: &str, ttl: Duration) -> Self {
        self.ttl_overrides.insert(resource.to_string(), ttl);
        self
    }

    pub fn with_ttl_overrides(mut self, overrides: HashMap<String, Duration>) -> Self {
        self.ttl_overrides.extend(overrides);
        self
    }

    /// Skip cache reads and writes for `get`
    pub fn bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn ttl_for(&self, resource: &str) -> Duration {
        self.ttl_overrides
            .get(resource)
            .copied()
            .unwrap_or_else(|| self.cache.default_ttl())
    }

    /// Read-through `resource` using its configured TTL
    pub async fn get<T: DeserializeOwned>(&self, resource: &str, params: &[(&str, &str)]) -> Result<T> {
        let ttl = self.ttl_for(resource);
        self.get_with_ttl(resource, params, ttl).await
    }

    /// Read-through `resource` with an explicit TTL
    pub async fn get_with_ttl<T: DeserializeOwned>(
        &self,
        resource: &str,
        params: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<T> {
        let key = cache_key(resource, params);

        if let Some(cached) = self.get_cached(&key) {
            debug!("Cache hit: {}", key);
            return Ok(cached);
        }

        let value = self.inner.read(resource, params).await?;
        let decoded = serde_json::from_value(value.clone())?;
        self.set_cached(&key, &value, ttl);
        Ok(decoded)
    }

    /// Perform a write, then invalidate the affected families.
    ///
    /// Nothing is invalidated when the write fails.
    pub async fn write<T, B>(
        &self,
        method: WriteMethod,
        resource: &str,
        id: Option<&str>,
        body: &B,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let result = self.inner.write(method, resource, id, &body).await?;

        let removed = self.invalidate_family(resource);
        debug!("{} {} invalidated {} cached reads", method, resource, removed);

        Ok(serde_json::from_value(result)?)
    }

    /// Invalidate `resource` and everything related to it
    pub fn invalidate_family(&self, resource: &str) -> usize {
        let families = self.rules.families_for(resource);
        match InvalidationRules::pattern_for(&families) {
            Ok(pattern) => self.cache.invalidate_pattern(&pattern),
            Err(e) => {
                warn!("Failed to build invalidation pattern for {}: {}", resource, e);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.bypass {
            return None;
        }
        self.cache.get(key)
    }

    fn set_cached(&self, key: &str, value: &serde_json::Value, ttl: Duration) {
        if !self.bypass {
            self.cache.set_with_ttl(key, value, ttl);
        }
    }
}
