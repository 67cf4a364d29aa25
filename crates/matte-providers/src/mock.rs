//! Scriptable provider doubles for switch and pipeline tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use matte_core::{BufferRole, HostCompositor, MatteError, Result, Size, TextureHandle};
use matte_runtime::{ResourcePool, RuntimeContext};

use crate::adapter::{AdapterFactory, ProviderAdapter};
use crate::bounds::SizeBounds;
use crate::id::ProviderId;

#[derive(Default)]
struct Shared {
    available: AtomicBool,
    create_delay_ms: AtomicU64,
    fail_create: AtomicBool,
    fail_load: AtomicBool,
    fail_process: AtomicBool,
    fail_process_hard: AtomicBool,
    creates: AtomicU64,
    loads: AtomicU64,
    unloads: AtomicU64,
    processes: AtomicU64,
}

/// Factory producing scripted adapters; all knobs stay live after creation
/// so a test can flip behavior mid-run.
pub struct MockFactory {
    id: ProviderId,
    shared: Arc<Shared>,
}

impl MockFactory {
    pub fn new(id: ProviderId) -> Self {
        let shared = Arc::new(Shared::default());
        shared.available.store(true, Ordering::Relaxed);
        Self { id, shared }
    }

    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Relaxed);
    }

    /// Stall `create` by `delay`, simulating slow effect construction.
    pub fn set_create_delay(&self, delay: Duration) {
        self.shared
            .create_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.shared.fail_create.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.shared.fail_load.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_process(&self, fail: bool) {
        self.shared.fail_process.store(fail, Ordering::Relaxed);
    }

    /// Fail `process` with a non-recoverable provider error.
    pub fn set_fail_process_hard(&self, fail: bool) {
        self.shared.fail_process_hard.store(fail, Ordering::Relaxed);
    }

    pub fn creates(&self) -> u64 {
        self.shared.creates.load(Ordering::Relaxed)
    }

    pub fn loads(&self) -> u64 {
        self.shared.loads.load(Ordering::Relaxed)
    }

    pub fn unloads(&self) -> u64 {
        self.shared.unloads.load(Ordering::Relaxed)
    }

    pub fn processes(&self) -> u64 {
        self.shared.processes.load(Ordering::Relaxed)
    }

    /// Adapters loaded and not yet unloaded.
    pub fn live_adapters(&self) -> u64 {
        self.loads().saturating_sub(self.unloads())
    }
}

impl AdapterFactory for MockFactory {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::Relaxed)
    }

    fn create(&self, _runtime: &Arc<RuntimeContext>) -> Result<Box<dyn ProviderAdapter>> {
        let delay = self.shared.create_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.shared.creates.fetch_add(1, Ordering::Relaxed);
        if self.shared.fail_create.load(Ordering::Relaxed) {
            return Err(MatteError::Provider {
                call: "create",
                code: -1,
                detail: "scripted create failure".into(),
            });
        }
        Ok(Box::new(MockAdapter {
            id: self.id,
            shared: Arc::clone(&self.shared),
            size: None,
        }))
    }
}

/// Adapter produced by [`MockFactory`].
pub struct MockAdapter {
    id: ProviderId,
    shared: Arc<Shared>,
    size: Option<Size>,
}

impl ProviderAdapter for MockAdapter {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn bounds(&self) -> SizeBounds {
        SizeBounds::default()
    }

    fn load(&mut self, host: &dyn HostCompositor, pool: &mut ResourcePool) -> Result<()> {
        if self.shared.fail_load.load(Ordering::Relaxed) {
            return Err(MatteError::Provider {
                call: "load",
                code: -2,
                detail: "scripted load failure".into(),
            });
        }
        // Warm up with a small working set, like the real adapter.
        self.resize(host, pool, Size::new(160, 90))?;
        self.shared.loads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn resize(
        &mut self,
        host: &dyn HostCompositor,
        pool: &mut ResourcePool,
        size: Size,
    ) -> Result<()> {
        let constrained = self.bounds().constrain(size);
        if self.size == Some(constrained) {
            return Ok(());
        }
        pool.ensure(host, BufferRole::WorkingInput, constrained)?;
        pool.ensure(host, BufferRole::WorkingOutput, constrained)?;
        pool.ensure(host, BufferRole::Output, constrained)?;
        self.size = Some(constrained);
        Ok(())
    }

    fn run_load_if_dirty(&mut self) -> Result<()> {
        Ok(())
    }

    fn process(
        &mut self,
        host: &dyn HostCompositor,
        pool: &mut ResourcePool,
    ) -> Result<TextureHandle> {
        self.shared.processes.fetch_add(1, Ordering::Relaxed);
        if self.shared.fail_process_hard.load(Ordering::Relaxed) {
            return Err(MatteError::Provider {
                call: "process",
                code: -3,
                detail: "scripted hard process failure".into(),
            });
        }
        if self.shared.fail_process.load(Ordering::Relaxed) {
            return Err(MatteError::NoResult {
                provider: self.id.to_string(),
            });
        }
        let size = self.size.unwrap_or(Size::MIN);
        Ok(pool.ensure(host, BufferRole::Output, size)?.texture)
    }

    fn unload(&mut self, host: &dyn HostCompositor, pool: &mut ResourcePool) {
        self.shared.unloads.fetch_add(1, Ordering::Relaxed);
        for role in [
            BufferRole::WorkingInput,
            BufferRole::WorkingOutput,
            BufferRole::Output,
        ] {
            pool.release(host, role);
        }
        self.size = None;
    }
}
