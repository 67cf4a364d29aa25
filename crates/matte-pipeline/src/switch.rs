//! Asynchronous provider switch controller.
//!
//! # Protocol
//!
//! A switch request resolves the target, marks the pipeline not-ready, and
//! records the target as active immediately; the expensive create/load runs
//! on a single background worker.  The render thread passes frames through
//! untouched until the worker commits.
//!
//! Every request bumps a generation counter.  The worker re-checks the
//! generation under the adapter lock before committing, so a switch that was
//! superseded while loading tears its adapter down instead of publishing it.
//! At most one request is pending: a new request aborts a queued task and
//! invalidates a running one through the generation.
//!
//! # Lock ordering
//!
//! Adapter slot first, then the resource pool.  Nothing may take the slot
//! while holding the pool.  The switch task enters the host graphics context
//! after taking the slot; the render thread already holds the graphics
//! context when it reaches for the slot, so it must never block there:
//! [`SwitchController::with_ready_adapter`] try-locks the slot and treats
//! contention as not-ready.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use matte_core::{graphics_scope, HostCompositor};
use matte_providers::{AdapterFactory, ProviderAdapter, ProviderId, ProviderRegistry};
use matte_runtime::{ResourcePool, RuntimeContext};

struct Shared {
    /// The switch lock.  Whoever holds it owns the adapter.
    slot: Mutex<Option<Box<dyn ProviderAdapter>>>,
    /// True only while `slot` holds an adapter that finished loading for the
    /// current generation.
    ready: AtomicBool,
    /// Active provider id, as a settings value.  Updated at request time.
    active: AtomicI64,
    /// Bumped by every request; a worker commits only if it still matches.
    generation: AtomicU64,
}

/// Orchestrates provider loads and unloads off the render thread.
pub struct SwitchController {
    runtime: Arc<RuntimeContext>,
    registry: Arc<ProviderRegistry>,
    host: Arc<dyn HostCompositor>,
    pool: Arc<Mutex<ResourcePool>>,
    shared: Arc<Shared>,
    worker: tokio::runtime::Runtime,
    pending: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl SwitchController {
    pub fn new(
        runtime: Arc<RuntimeContext>,
        registry: Arc<ProviderRegistry>,
        host: Arc<dyn HostCompositor>,
        pool: Arc<Mutex<ResourcePool>>,
    ) -> std::io::Result<Self> {
        let worker = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("matte-switch")
            .enable_time()
            .build()?;
        Ok(Self {
            runtime,
            registry,
            host,
            pool,
            shared: Arc::new(Shared {
                slot: Mutex::new(None),
                ready: AtomicBool::new(false),
                active: AtomicI64::new(ProviderId::Invalid.as_settings()),
                generation: AtomicU64::new(0),
            }),
            worker,
            pending: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Provider the pipeline is switched to (or switching to).
    pub fn active(&self) -> ProviderId {
        ProviderId::from_settings(self.shared.active.load(Ordering::Acquire))
    }

    /// Whether the active provider has finished loading.
    pub fn ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Request a switch to `requested`.  Re-requesting the current target is
    /// a no-op; anything else supersedes whatever switch is in flight.
    pub fn request_switch(&self, requested: ProviderId) {
        let target = self.registry.resolve(requested);
        if target == self.active() {
            return;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.ready.store(false, Ordering::Release);
        let previous = self.shared.active.swap(target.as_settings(), Ordering::AcqRel);
        info!(
            from = %ProviderId::from_settings(previous),
            to = %target,
            generation,
            "provider switch requested"
        );

        let mut pending = self.pending.lock().unwrap();
        if let Some(handle) = pending.take() {
            // Only stops the task if it has not started; a running task is
            // invalidated by the generation instead.
            handle.abort();
        }

        let shared = Arc::clone(&self.shared);
        let runtime = Arc::clone(&self.runtime);
        let registry = Arc::clone(&self.registry);
        let host = Arc::clone(&self.host);
        let pool = Arc::clone(&self.pool);
        let cancel = self.cancel.clone();
        *pending = Some(self.worker.spawn_blocking(move || {
            switch_task(shared, runtime, registry, host, pool, cancel, target, generation);
        }));
    }

    /// Run `f` on the ready adapter and the pool, under the switch lock.
    /// Returns `None` while no provider is ready.
    pub fn with_ready_adapter<R>(
        &self,
        f: impl FnOnce(&mut dyn ProviderAdapter, &mut ResourcePool) -> R,
    ) -> Option<R> {
        if !self.ready() {
            return None;
        }
        // A switch task owns the slot while it loads or unloads; contention
        // reads as not-ready so the render thread never blocks here.
        let Ok(mut slot) = self.shared.slot.try_lock() else {
            return None;
        };
        let adapter = slot.as_mut()?;
        let mut pool = self.pool.lock().unwrap();
        Some(f(adapter.as_mut(), &mut pool))
    }

    /// Drop the ready flag without unloading, forcing pass-through until the
    /// next successful switch commit.
    pub fn mark_not_ready(&self) {
        self.shared.ready.store(false, Ordering::Release);
    }

    /// Cancel pending work and unload the active adapter.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.pending.lock().unwrap().take() {
            handle.abort();
        }
        self.shared.ready.store(false, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        let mut slot = self.shared.slot.lock().unwrap();
        if let Some(mut adapter) = slot.take() {
            let _gfx = graphics_scope(self.host.as_ref());
            let mut pool = self.pool.lock().unwrap();
            adapter.unload(self.host.as_ref(), &mut pool);
        }
        self.shared
            .active
            .store(ProviderId::Invalid.as_settings(), Ordering::Release);
    }
}

impl Drop for SwitchController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn switch_task(
    shared: Arc<Shared>,
    runtime: Arc<RuntimeContext>,
    registry: Arc<ProviderRegistry>,
    host: Arc<dyn HostCompositor>,
    pool: Arc<Mutex<ResourcePool>>,
    cancel: CancellationToken,
    target: ProviderId,
    generation: u64,
) {
    if cancel.is_cancelled() {
        return;
    }

    let mut slot = shared.slot.lock().unwrap();
    if shared.generation.load(Ordering::Acquire) != generation {
        debug!(to = %target, generation, "switch superseded before it started");
        return;
    }
    // GPU objects are created and destroyed only inside the host graphics
    // context, on the render thread and here.
    let _gfx = graphics_scope(host.as_ref());

    // The outgoing adapter is unloaded regardless of what the new target is.
    if let Some(mut adapter) = slot.take() {
        let old = adapter.id();
        let mut pool = pool.lock().unwrap();
        adapter.unload(host.as_ref(), &mut pool);
        debug!(from = %old, "previous provider unloaded");
    }

    if !target.is_concrete() {
        return;
    }
    let Some(factory) = registry.factory(target) else {
        warn!(to = %target, "no factory registered for provider");
        return;
    };

    let loaded = create_and_load(factory, &runtime, host.as_ref(), &pool);
    match loaded {
        Ok(adapter) => {
            if shared.generation.load(Ordering::Acquire) == generation {
                *slot = Some(adapter);
                shared.ready.store(true, Ordering::Release);
                // A request may have landed between the check and the store;
                // it will retake the slot, so only the flag needs repair.
                if shared.generation.load(Ordering::Acquire) != generation {
                    shared.ready.store(false, Ordering::Release);
                }
                info!(provider = %target, generation, "provider ready");
            } else {
                let mut adapter = adapter;
                let mut pool = pool.lock().unwrap();
                adapter.unload(host.as_ref(), &mut pool);
                debug!(to = %target, generation, "switch superseded while loading");
            }
        }
        Err(err) => {
            warn!(provider = %target, error = %err, "provider switch failed; passing frames through");
        }
    }
}

fn create_and_load(
    factory: &Arc<dyn AdapterFactory>,
    runtime: &Arc<RuntimeContext>,
    host: &dyn HostCompositor,
    pool: &Mutex<ResourcePool>,
) -> matte_core::Result<Box<dyn ProviderAdapter>> {
    let mut adapter = factory.create(runtime)?;
    let mut locked = pool.lock().unwrap();
    if let Err(err) = adapter.load(host, &mut locked) {
        adapter.unload(host, &mut locked);
        return Err(err);
    }
    Ok(adapter)
}
