//! End-to-end scenarios across the cache, controller, gate and façade

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

use freshgate::cache::storage::SqliteStore;
use freshgate::cache::{CacheStore, InvalidationRules, RequestCache, cache_key};
use freshgate::client::{ResourceApi, WriteMethod};
use freshgate::{
    BackgroundMaintainer, DataController, Error, GateConfig, LoadOutcome, ManualClock, Result,
    SignalHub,
};

/// Transport that echoes writes and answers every read with the read count
#[derive(Default)]
struct EchoApi {
    reads: AtomicUsize,
}

#[async_trait]
impl ResourceApi for EchoApi {
    async fn read(&self, _resource: &str, _params: &[(&str, &str)]) -> Result<Value> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!(n))
    }

    async fn write(
        &self,
        _method: WriteMethod,
        _resource: &str,
        _id: Option<&str>,
        body: &Value,
    ) -> Result<Value> {
        Ok(body.clone())
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test]
async fn write_through_facade_busts_controller_cache() {
    let cache = Arc::new(CacheStore::new());
    let fetches = counter();

    let calls = fetches.clone();
    let controller = DataController::builder(cache_key("inventory", &[]), move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok::<_, Error>(n) }
    })
    .cache(cache.clone())
    .build();

    assert_eq!(controller.mount().await, LoadOutcome::Fetched);

    let api = RequestCache::new(EchoApi::default(), cache.clone())
        .with_rules(InvalidationRules::new().relate("room", ["inventory"]));
    let _: Value = api
        .write(WriteMethod::Post, "room", None, &json!({"name": "Blue"}))
        .await
        .unwrap();

    assert!(cache.get::<usize>("api_inventory").is_none());
    assert_eq!(controller.state().data, Some(1));

    assert_eq!(controller.load(false).await, LoadOutcome::Fetched);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn durable_mirror_survives_restart() {
    let dir = tempdir().unwrap();

    {
        let durable = Arc::new(SqliteStore::open_at(dir.path()).unwrap());
        let cache = Arc::new(
            CacheStore::builder()
                .durable(durable)
                .persist_key("api_profile")
                .build(),
        );
        let controller = DataController::builder("api_profile", || async {
            Ok::<_, Error>("ana".to_string())
        })
        .cache(cache)
        .build();
        assert_eq!(controller.mount().await, LoadOutcome::Fetched);
    }

    let durable = Arc::new(SqliteStore::open_at(dir.path()).unwrap());
    let cache = Arc::new(CacheStore::builder().durable(durable).build());
    assert_eq!(cache.load_from_durable().restored, 1);

    let controller = DataController::builder("api_profile", || async {
        Err::<String, _>(Error::fetch("offline"))
    })
    .cache(cache)
    .build();

    assert_eq!(controller.mount().await, LoadOutcome::CacheHit);
    assert_eq!(controller.state().data.as_deref(), Some("ana"));
}

#[tokio::test(start_paused = true)]
async fn visibility_change_triggers_one_passive_refresh() {
    let clock = ManualClock::starting_now();
    let cache = Arc::new(CacheStore::builder().clock(clock.clone()).build());
    let hub = SignalHub::new();
    let fetches = counter();

    let calls = fetches.clone();
    let controller = DataController::builder("api_availability", move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok::<_, Error>(n) }
    })
    .cache(cache)
    .clock(clock.clone())
    .gate_config(GateConfig {
        min_interval: Duration::from_secs(60),
        ..GateConfig::default()
    })
    .build();
    controller.attach_signals(&hub);
    controller.mount().await;

    // Fresh data: tab switching does nothing
    hub.set_visible(false);
    hub.set_visible(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // Old data: a burst of switches yields exactly one refresh
    clock.advance(Duration::from_secs(120));
    for _ in 0..3 {
        hub.set_visible(false);
        hub.set_visible(true);
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(controller.state().data, Some(2));
    controller.shutdown();
}

#[tokio::test]
async fn maintainer_sweeps_controller_entries() {
    let clock = ManualClock::starting_now();
    let cache = Arc::new(CacheStore::builder().clock(clock.clone()).build());

    let controller = DataController::builder("api_rates", || async { Ok::<_, Error>(3.5f64) })
        .cache(cache.clone())
        .clock(clock.clone())
        .ttl(Duration::from_secs(30))
        .build();
    controller.mount().await;

    let maintainer = BackgroundMaintainer::new(cache.clone());
    clock.advance(Duration::from_secs(31));

    assert_eq!(maintainer.sweep_now(), 1);
    assert!(cache.is_empty());
    assert!(controller.state().is_stale);
    assert_eq!(controller.state().data, Some(3.5));
}
