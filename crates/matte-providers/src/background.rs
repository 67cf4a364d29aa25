//! Accelerated background segmentation adapter.
//!
//! Drives the runtime's green-screen effect: RGBA frames go in through the
//! `WorkingInput` buffer, the effect writes an 8-bit mask to `WorkingOutput`,
//! and the mask is transferred out to the `Output` buffer the pipeline
//! composites with.  A staging image backs the downscaling transfer so the
//! library never allocates per frame.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use matte_core::{
    BufferRole, HostCompositor, MatteError, Result, Size, TextureFormat, TextureHandle,
};
use matte_runtime::api::MODE_QUALITY;
use matte_runtime::{EffectHandle, ImageHandle, ResourcePool, RuntimeContext};

use crate::adapter::{AdapterFactory, ProviderAdapter};
use crate::bounds::SizeBounds;
use crate::id::ProviderId;

/// Effect id understood by the video effects runtime.
pub const EFFECT_ID: &str = "GreenScreen";

/// Warm-up resolution loaded before the first real frame arrives, so the
/// first render-thread resize only rebinds instead of cold-starting.
const WARM_SIZE: Size = Size::new(160, 90);

/// Environment override for the segmentation model directory.
pub const MODEL_DIR_ENV: &str = "NV_VIDEO_EFFECTS_MODEL_DIR";

const DEFAULT_MODEL_DIR: &str = "/usr/local/VideoFX/lib/models";

fn model_dir() -> PathBuf {
    match std::env::var(MODEL_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_MODEL_DIR),
    }
}

pub struct BackgroundAdapter {
    runtime: Arc<RuntimeContext>,
    effect: EffectHandle,
    bounds: SizeBounds,
    /// Constrained working size, once the first resize has happened.
    size: Option<Size>,
    staging: Option<ImageHandle>,
    dirty: bool,
}

impl BackgroundAdapter {
    pub fn new(runtime: Arc<RuntimeContext>) -> Result<Self> {
        let api = Arc::clone(runtime.api());
        let effect = api.create_effect(EFFECT_ID)?;
        let dir = model_dir();
        debug!(model_dir = %dir.display(), "configuring segmentation effect");
        let configured = api
            .set_stream(effect, runtime.stream())
            .and_then(|_| api.set_model_dir(effect, &dir))
            .and_then(|_| api.set_mode(effect, MODE_QUALITY));
        if let Err(err) = configured {
            api.destroy_effect(effect);
            return Err(err);
        }
        Ok(Self {
            runtime,
            effect,
            bounds: SizeBounds::default(),
            size: None,
            staging: None,
            dirty: true,
        })
    }

    fn release_staging(&mut self) {
        if let Some(staging) = self.staging.take() {
            if let Err(err) = self.runtime.api().dealloc_image(staging) {
                warn!(error = %err, "staging image dealloc failed");
            }
        }
    }

    fn pooled(pool: &ResourcePool, role: BufferRole) -> Result<matte_runtime::PoolEntry> {
        pool.entry(role).cloned().ok_or_else(|| {
            MatteError::InvariantViolation(format!("pool has no {role:?} buffer"))
        })
    }
}

impl ProviderAdapter for BackgroundAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::BackgroundSegmentation
    }

    fn bounds(&self) -> SizeBounds {
        self.bounds
    }

    fn load(&mut self, host: &dyn HostCompositor, pool: &mut ResourcePool) -> Result<()> {
        self.resize(host, pool, WARM_SIZE)?;
        self.run_load_if_dirty()
    }

    fn resize(
        &mut self,
        host: &dyn HostCompositor,
        pool: &mut ResourcePool,
        size: Size,
    ) -> Result<()> {
        let constrained = self.bounds.constrain(size);
        if self.size == Some(constrained) {
            return Ok(());
        }
        let api = Arc::clone(self.runtime.api());

        let input = pool.ensure(host, BufferRole::WorkingInput, constrained)?;
        let output = pool.ensure(host, BufferRole::WorkingOutput, constrained)?;
        pool.ensure(host, BufferRole::Output, constrained)?;

        self.release_staging();
        self.staging = Some(api.alloc_image(constrained, TextureFormat::Rgba8)?);

        api.bind_input(self.effect, input.image)?;
        api.bind_output(self.effect, output.image)?;

        debug!(size = %constrained, "segmentation working size changed");
        self.size = Some(constrained);
        self.dirty = true;
        Ok(())
    }

    fn run_load_if_dirty(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.runtime.api().load_effect(self.effect)?;
        self.dirty = false;
        Ok(())
    }

    fn process(
        &mut self,
        _host: &dyn HostCompositor,
        pool: &mut ResourcePool,
    ) -> Result<TextureHandle> {
        let api = Arc::clone(self.runtime.api());
        let stream = self.runtime.stream();

        let input = Self::pooled(pool, BufferRole::Input)?;
        let working_in = Self::pooled(pool, BufferRole::WorkingInput)?;
        let working_out = Self::pooled(pool, BufferRole::WorkingOutput)?;
        let output = Self::pooled(pool, BufferRole::Output)?;

        // Drain any work still queued from the previous frame before the
        // captured input is overwritten.
        self.runtime.sync()?;
        api.transfer(input.image, working_in.image, 1.0, stream, self.staging)?;
        api.run_effect(self.effect)?;
        api.transfer(working_out.image, output.image, 1.0, stream, None)?;
        self.runtime.sync()?;

        Ok(output.texture)
    }

    fn unload(&mut self, host: &dyn HostCompositor, pool: &mut ResourcePool) {
        self.release_staging();
        for role in [
            BufferRole::WorkingInput,
            BufferRole::WorkingOutput,
            BufferRole::Output,
        ] {
            pool.release(host, role);
        }
        self.runtime.api().destroy_effect(self.effect);
        self.size = None;
        self.dirty = true;
    }
}

/// Factory for [`BackgroundAdapter`].
pub struct BackgroundFactory;

impl AdapterFactory for BackgroundFactory {
    fn id(&self) -> ProviderId {
        ProviderId::BackgroundSegmentation
    }

    fn is_available(&self) -> bool {
        RuntimeContext::acquire().is_ok()
    }

    fn create(&self, runtime: &Arc<RuntimeContext>) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(BackgroundAdapter::new(Arc::clone(runtime))?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use matte_core::mock::MockCompositor;
    use matte_core::{BufferRole, HostCompositor, Size};
    use matte_runtime::mock::MockAccelerator;
    use matte_runtime::{ResourcePool, RuntimeContext};

    use super::BackgroundAdapter;
    use crate::adapter::ProviderAdapter;

    fn harness() -> (
        Arc<MockAccelerator>,
        MockCompositor,
        ResourcePool,
        BackgroundAdapter,
    ) {
        let api = Arc::new(MockAccelerator::new());
        let runtime = RuntimeContext::with_api(api.clone()).unwrap();
        let host = MockCompositor::new(Size::new(1280, 720));
        let pool = ResourcePool::new(runtime.clone());
        let adapter = BackgroundAdapter::new(runtime).unwrap();
        (api, host, pool, adapter)
    }

    fn relaxed(counter: &std::sync::atomic::AtomicU64) -> u64 {
        counter.load(std::sync::atomic::Ordering::Relaxed)
    }

    #[test]
    fn load_warms_up_and_loads_once() {
        let (api, host, mut pool, mut adapter) = harness();
        adapter.load(&host, &mut pool).unwrap();
        assert_eq!(relaxed(&api.calls.load_effect), 1);
        // Warm-up provisioned the three adapter-owned roles.
        assert!(pool.entry(BufferRole::WorkingInput).is_some());
        assert!(pool.entry(BufferRole::WorkingOutput).is_some());
        assert!(pool.entry(BufferRole::Output).is_some());
    }

    #[test]
    fn repeated_resize_is_a_no_op() {
        let (api, host, mut pool, mut adapter) = harness();
        adapter.load(&host, &mut pool).unwrap();
        adapter.resize(&host, &mut pool, Size::new(1280, 720)).unwrap();
        adapter.run_load_if_dirty().unwrap();
        let loads = relaxed(&api.calls.load_effect);
        let allocations = pool.stats.snapshot().0;

        adapter.resize(&host, &mut pool, Size::new(1280, 720)).unwrap();
        adapter.run_load_if_dirty().unwrap();
        assert_eq!(relaxed(&api.calls.load_effect), loads);
        assert_eq!(pool.stats.snapshot().0, allocations);
    }

    #[test]
    fn process_transfers_in_runs_and_transfers_out() {
        let (api, host, mut pool, mut adapter) = harness();
        adapter.load(&host, &mut pool).unwrap();
        adapter.resize(&host, &mut pool, Size::new(1280, 720)).unwrap();
        adapter.run_load_if_dirty().unwrap();
        pool.ensure(&host, BufferRole::Input, Size::new(1280, 720)).unwrap();

        let mask = adapter.process(&host, &mut pool).unwrap();
        assert_eq!(mask, pool.entry(BufferRole::Output).unwrap().texture);
        assert_eq!(relaxed(&api.calls.run_effect), 1);
        assert_eq!(relaxed(&api.calls.transfer), 2);
        assert!(relaxed(&api.calls.sync_stream) >= 2);
    }

    #[test]
    fn unload_releases_adapter_roles_and_effect() {
        let (api, host, mut pool, mut adapter) = harness();
        adapter.load(&host, &mut pool).unwrap();
        pool.ensure(&host, BufferRole::Input, Size::new(1280, 720)).unwrap();

        adapter.unload(&host, &mut pool);
        assert_eq!(api.live_effects(), 0);
        // The pipeline-owned Input buffer stays.
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.entry(BufferRole::Input).is_some());
    }
}
