//! freshgate - client-side data freshness layer
//!
//! Decides, per named resource, whether to serve a cached value, fetch a new
//! one or fall back to a stale default:
//!
//! - [`cache::CacheStore`]: TTL cache with size-bounded eviction, pattern
//!   invalidation and an optional durable mirror
//! - [`gate::UpdateGate`]: throttled, signal-driven passive refresh
//! - [`controller::DataController`]: per-resource loading with staleness,
//!   fallback and dependency-triggered reloads
//! - [`cache::RequestCache`]: read-through façade over a [`client::ResourceApi`]
//! - [`maintainer::BackgroundMaintainer`]: periodic expiry sweeps

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod maintainer;
pub mod task;

pub use cache::{CacheStore, CacheTtl, RequestCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use controller::{DataController, Fetcher, LoadOutcome, ResourceState};
pub use error::{Error, Result};
pub use gate::{EnvSignal, GateConfig, SignalHub, UpdateGate, UpdateOutcome};
pub use maintainer::BackgroundMaintainer;
