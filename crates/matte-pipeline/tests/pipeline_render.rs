//! End-to-end pipeline behavior over the scripted host and accelerator.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use matte_core::mock::{HostEvent, MockCompositor};
use matte_core::{EffectSettings, Rect, Size};
use matte_pipeline::EffectPipeline;
use matte_providers::mock::MockFactory;
use matte_providers::{ProviderId, ProviderRegistry};
use matte_runtime::mock::MockAccelerator;
use matte_runtime::RuntimeContext;

struct Harness {
    host: Arc<MockCompositor>,
    api: Arc<MockAccelerator>,
    factory: Arc<MockFactory>,
    pipeline: EffectPipeline,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let api = Arc::new(MockAccelerator::new());
    let runtime = RuntimeContext::with_api(api.clone()).unwrap();
    let host = Arc::new(MockCompositor::new(Size::new(1280, 720)));
    let factory = Arc::new(MockFactory::new(ProviderId::BackgroundSegmentation));
    let registry = Arc::new(ProviderRegistry::new(vec![factory.clone()]));
    let pipeline = EffectPipeline::with_runtime(host.clone(), runtime, registry).unwrap();
    Harness {
        host,
        api,
        factory,
        pipeline,
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

fn segmentation_settings() -> EffectSettings {
    EffectSettings::from_blob(&serde_json::json!({ "provider": 1 }))
}

fn switch_and_wait(h: &mut Harness) {
    h.pipeline.update(&segmentation_settings());
    assert!(wait_for(|| h.pipeline.provider_ready()));
    h.host.clear_events();
}

#[test]
fn renders_a_composited_frame() {
    let mut h = harness();
    switch_and_wait(&mut h);

    h.pipeline.video_tick();
    h.pipeline.video_render();

    let events = h.host.events();
    assert_eq!(
        h.host.count(|e| matches!(e, HostEvent::Capture(size) if *size == Size::new(1280, 720))),
        1
    );
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Composite { .. })), 1);
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Present { .. })), 1);
    // Composite happens before present.
    let composite_at = events
        .iter()
        .position(|e| matches!(e, HostEvent::Composite { .. }))
        .unwrap();
    let present_at = events
        .iter()
        .position(|e| matches!(e, HostEvent::Present { .. }))
        .unwrap();
    assert!(composite_at < present_at);

    let metrics = h.pipeline.metrics();
    assert_eq!(metrics.frames_processed.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(h.factory.processes(), 1);
}

#[test]
fn passes_through_until_the_provider_is_ready() {
    let mut h = harness();
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Skip)), 1);
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Capture(_))), 0);

    switch_and_wait(&mut h);
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Present { .. })), 1);
}

#[test]
fn repeated_renders_reuse_the_cached_frame() {
    let mut h = harness();
    switch_and_wait(&mut h);

    h.pipeline.video_tick();
    h.pipeline.video_render();
    h.pipeline.video_render();
    h.pipeline.video_render();

    assert_eq!(h.factory.processes(), 1);
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Capture(_))), 1);
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Present { .. })), 3);

    // The next tick invalidates the cache and processing resumes.
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.factory.processes(), 2);
}

#[test]
fn constrained_output_sizes_the_presented_frame() {
    let mut h = harness();
    switch_and_wait(&mut h);

    // 4000x30 violates the provider's short-side minimum; the output is
    // scaled to 10667x80 while capture stays at the input size.
    h.host.set_target_size(Size::new(4000, 30));
    h.pipeline.video_tick();
    h.pipeline.video_render();

    let out = Size::new(10667, 80);
    assert_eq!(h.pipeline.output_size(), out);
    assert_eq!(
        h.host
            .count(|e| matches!(e, HostEvent::Capture(size) if *size == Size::new(4000, 30))),
        1
    );
    assert_eq!(
        h.host
            .count(|e| matches!(e, HostEvent::Present { dst, .. } if *dst == Rect::full(out))),
        1
    );

    // An unconstrained size presents at the input size again.
    h.host.set_target_size(Size::new(1280, 720));
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.pipeline.output_size(), Size::new(1280, 720));
}

#[test]
fn zero_area_target_passes_through() {
    let mut h = harness();
    switch_and_wait(&mut h);

    h.host.set_target_size(Size::new(0, 0));
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Skip)), 1);
    assert_eq!(h.factory.processes(), 0);
}

#[test]
fn declined_capture_falls_back_to_the_cache() {
    let mut h = harness();
    switch_and_wait(&mut h);

    // No cache yet and nothing captured: draw the source untouched.
    h.host.set_decline_capture(true);
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Skip)), 1);

    // Build a cache, then decline again: the stale cache is re-presented.
    h.host.set_decline_capture(false);
    h.pipeline.video_tick();
    h.pipeline.video_render();
    h.host.set_decline_capture(true);
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Present { .. })), 2);
    assert_eq!(h.factory.processes(), 1);
}

#[test]
fn failing_provider_presents_the_last_good_frame() {
    let mut h = harness();
    switch_and_wait(&mut h);

    h.pipeline.video_tick();
    h.pipeline.video_render();

    h.factory.set_fail_process(true);
    h.pipeline.video_tick();
    h.pipeline.video_render();

    assert_eq!(h.host.count(|e| matches!(e, HostEvent::Present { .. })), 2);
    let metrics = h.pipeline.metrics();
    assert_eq!(metrics.process_failures.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn hard_failure_latches_the_provider_off() {
    let mut h = harness();
    switch_and_wait(&mut h);

    h.factory.set_fail_process_hard(true);
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert!(!h.pipeline.provider_ready());

    // Further renders pass through without touching the provider again.
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.factory.processes(), 1);
    assert_eq!(
        h.pipeline
            .metrics()
            .process_failures
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );

    // A fresh switch brings it back.
    h.factory.set_fail_process_hard(false);
    h.pipeline.update(&EffectSettings { provider: -1 });
    h.pipeline.update(&segmentation_settings());
    assert!(wait_for(|| h.pipeline.provider_ready()));
    h.pipeline.video_tick();
    h.pipeline.video_render();
    assert_eq!(h.factory.processes(), 2);
}

#[test]
fn resize_reallocates_each_role_once() {
    let mut h = harness();
    switch_and_wait(&mut h);

    h.pipeline.video_tick();
    h.pipeline.video_render();
    let pool = h.pipeline.pool();
    let (allocs_before, _, releases_before, _) = pool.lock().unwrap().stats.snapshot();

    h.host.set_target_size(Size::new(640, 360));
    h.pipeline.video_tick();
    h.pipeline.video_render();
    {
        let pool = pool.lock().unwrap();
        let (allocs, _, releases, _) = pool.stats.snapshot();
        // Input plus the three provider-owned roles cycle exactly once each.
        assert_eq!(allocs - allocs_before, 4);
        assert_eq!(releases - releases_before, 4);
    }

    // A steady size reallocates nothing.
    h.pipeline.video_tick();
    h.pipeline.video_render();
    let (allocs, _, releases, _) = pool.lock().unwrap().stats.snapshot();
    assert_eq!(allocs - allocs_before, 4);
    assert_eq!(releases - releases_before, 4);
}

#[test]
fn rapid_switching_and_shutdown_leak_nothing() {
    let mut h = harness();
    for _ in 0..5 {
        h.pipeline.update(&segmentation_settings());
        h.pipeline.update(&EffectSettings { provider: -1 });
    }
    switch_and_wait(&mut h);
    h.pipeline.video_tick();
    h.pipeline.video_render();

    h.pipeline.shutdown();
    assert_eq!(h.factory.live_adapters(), 0);
    assert_eq!(h.api.live_images(), 0);
    assert_eq!(h.host.live_texture_count(), 0);
    assert_eq!(h.pipeline.pool().lock().unwrap().outstanding(), 0);
}
