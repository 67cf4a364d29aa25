//! Switch controller behavior against scripted providers.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use matte_core::mock::MockCompositor;
use matte_core::Size;
use matte_pipeline::SwitchController;
use matte_providers::mock::MockFactory;
use matte_providers::{ProviderId, ProviderRegistry};
use matte_runtime::mock::MockAccelerator;
use matte_runtime::{ResourcePool, RuntimeContext};

struct Harness {
    host: Arc<MockCompositor>,
    api: Arc<MockAccelerator>,
    factory: Arc<MockFactory>,
    pool: Arc<Mutex<ResourcePool>>,
    controller: SwitchController,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let api = Arc::new(MockAccelerator::new());
    let runtime = RuntimeContext::with_api(api.clone()).unwrap();
    let host = Arc::new(MockCompositor::new(Size::new(1280, 720)));
    let pool = Arc::new(Mutex::new(ResourcePool::new(runtime.clone())));
    let factory = Arc::new(MockFactory::new(ProviderId::BackgroundSegmentation));
    let registry = Arc::new(ProviderRegistry::new(vec![factory.clone()]));
    let controller =
        SwitchController::new(runtime, registry, host.clone(), pool.clone()).unwrap();
    Harness {
        host,
        api,
        factory,
        pool,
        controller,
    }
}

fn wait_for(mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn switch_commits_and_reports_ready() {
    let h = harness();
    assert_eq!(h.controller.active(), ProviderId::Invalid);
    assert!(!h.controller.ready());

    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    // Active flips immediately; readiness follows once the load commits.
    assert_eq!(h.controller.active(), ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.controller.ready()));
    assert_eq!(h.factory.loads(), 1);
    assert_eq!(h.factory.live_adapters(), 1);
}

#[test]
fn automatic_resolves_before_switching() {
    let h = harness();
    h.controller.request_switch(ProviderId::Automatic);
    assert_eq!(h.controller.active(), ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.controller.ready()));
}

#[test]
fn repeat_requests_are_idempotent() {
    let h = harness();
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.controller.ready()));
    assert_eq!(h.factory.creates(), 1);

    // Still ready and still only one adapter after another repeat.
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    assert!(h.controller.ready());
    assert_eq!(h.factory.creates(), 1);
}

#[test]
fn later_request_supersedes_a_slow_load() {
    let h = harness();
    h.factory.set_create_delay(Duration::from_millis(50));
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    h.controller.request_switch(ProviderId::Invalid);

    assert_eq!(h.controller.active(), ProviderId::Invalid);
    // Give the superseded load every chance to finish and roll back.
    assert!(wait_for(|| h.factory.live_adapters() == 0
        && h.pool.lock().unwrap().outstanding() == 0));
    std::thread::sleep(Duration::from_millis(100));
    assert!(!h.controller.ready());
    assert_eq!(h.controller.active(), ProviderId::Invalid);
    assert_eq!(h.factory.live_adapters(), 0);
    assert_eq!(h.api.live_images(), 0);
    assert_eq!(h.host.live_texture_count(), 0);
}

#[test]
fn failed_load_leaves_passthrough() {
    let h = harness();
    h.factory.set_fail_load(true);
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.factory.creates() == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert!(!h.controller.ready());
    assert_eq!(h.factory.live_adapters(), 0);
    assert_eq!(h.pool.lock().unwrap().outstanding(), 0);
}

#[test]
fn switching_away_unloads_the_previous_provider() {
    let h = harness();
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.controller.ready()));

    h.controller.request_switch(ProviderId::Invalid);
    assert!(!h.controller.ready());
    assert!(wait_for(|| h.factory.unloads() == 1));
    assert_eq!(h.factory.live_adapters(), 0);
    assert_eq!(h.pool.lock().unwrap().outstanding(), 0);
}

#[test]
fn rapid_alternating_requests_settle_on_the_last() {
    let h = harness();
    for _ in 0..10 {
        h.controller.request_switch(ProviderId::BackgroundSegmentation);
        h.controller.request_switch(ProviderId::Invalid);
    }
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.controller.ready()));
    assert_eq!(h.controller.active(), ProviderId::BackgroundSegmentation);
    assert_eq!(h.factory.live_adapters(), 1);
}

#[test]
fn contended_slot_reads_as_not_ready() {
    let h = harness();
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.controller.ready()));

    // While someone holds the slot, the render path must fall back to
    // pass-through instead of blocking on it.
    let nested = h.controller.with_ready_adapter(|_, _| {
        h.controller.with_ready_adapter(|_, _| ()).is_none()
    });
    assert_eq!(nested, Some(true));
}

#[test]
fn shutdown_unloads_and_is_idempotent() {
    let h = harness();
    h.controller.request_switch(ProviderId::BackgroundSegmentation);
    assert!(wait_for(|| h.controller.ready()));

    h.controller.shutdown();
    assert!(!h.controller.ready());
    assert_eq!(h.controller.active(), ProviderId::Invalid);
    assert_eq!(h.factory.live_adapters(), 0);
    assert_eq!(h.pool.lock().unwrap().outstanding(), 0);

    h.controller.shutdown();
    assert_eq!(h.factory.unloads(), 1);
}
