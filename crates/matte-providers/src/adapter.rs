//! Provider adapter seam between the pipeline and concrete effects.
//!
//! An adapter owns one effect instance and the working buffers behind the
//! `WorkingInput`, `WorkingOutput` and `Output` pool roles.  The pipeline
//! owns the pool itself and the captured `Input` buffer, and threads both
//! into every adapter call.
//!
//! Adapter methods block; the switch controller runs the expensive ones off
//! the render thread.

use std::sync::Arc;

use matte_core::{HostCompositor, Result, Size, TextureHandle};
use matte_runtime::{ResourcePool, RuntimeContext};

use crate::bounds::SizeBounds;
use crate::id::ProviderId;

/// One loaded matte provider.
pub trait ProviderAdapter: Send {
    fn id(&self) -> ProviderId;

    /// Constraints this provider imposes on its working resolution.
    fn bounds(&self) -> SizeBounds;

    /// Bring the effect to a runnable state at a small warm-up resolution.
    /// Called once, off the render thread, before the provider is announced
    /// ready.
    fn load(&mut self, host: &dyn HostCompositor, pool: &mut ResourcePool) -> Result<()>;

    /// Adopt a new frame size.  Reallocates working buffers and marks the
    /// effect configuration dirty when the constrained size changed; a
    /// repeated size is a no-op.
    fn resize(&mut self, host: &dyn HostCompositor, pool: &mut ResourcePool, size: Size)
        -> Result<()>;

    /// Re-run the effect's load step if a resize left it dirty.  Cheap when
    /// clean.
    fn run_load_if_dirty(&mut self) -> Result<()>;

    /// Run the effect on the current `Input` buffer and return the mask
    /// texture.
    fn process(
        &mut self,
        host: &dyn HostCompositor,
        pool: &mut ResourcePool,
    ) -> Result<TextureHandle>;

    /// Tear down the effect and release the adapter-owned pool roles.
    /// Infallible by contract; failures are logged and swallowed.
    fn unload(&mut self, host: &dyn HostCompositor, pool: &mut ResourcePool);
}

/// Builds adapters for one provider id.
pub trait AdapterFactory: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether this provider can run on the current machine.  Probing must
    /// be cheap; expensive setup belongs in [`AdapterFactory::create`].
    fn is_available(&self) -> bool;

    fn create(&self, runtime: &Arc<RuntimeContext>) -> Result<Box<dyn ProviderAdapter>>;
}
