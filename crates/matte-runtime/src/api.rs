//! Accelerator surface used by the pool and the provider adapters.
//!
//! The trait mirrors the effect/image split of the underlying video effects
//! runtime: effects are created, configured, loaded and run; images wrap or
//! shadow host textures and move pixels between them.  Handles are opaque
//! `u64` ids minted by the implementation, never raw library pointers, so the
//! trait stays `Send + Sync` and the mock needs no unsafe code.

use std::path::Path;

use matte_core::{Result, Size, TextureFormat, TextureHandle};

/// Opaque handle to a created effect instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EffectHandle(pub u64);

/// Opaque handle to an accelerator-side image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u64);

/// Opaque handle to a compute stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Segmentation mode knob exposed by the effect (0 = quality, 1 = performance).
pub const MODE_QUALITY: u32 = 0;

/// Calls into the accelerated video effects runtime.
///
/// All methods are blocking and may be called from the render thread or from
/// a switch task; implementations serialize internally where the underlying
/// library requires it.
pub trait AcceleratorApi: Send + Sync {
    // Effect lifecycle.

    /// Instantiate the named effect.
    fn create_effect(&self, effect_id: &str) -> Result<EffectHandle>;

    /// Destroy an effect.  Infallible by contract; implementations log and
    /// swallow library-side failures.
    fn destroy_effect(&self, effect: EffectHandle);

    /// Attach the compute stream all of this effect's work runs on.
    fn set_stream(&self, effect: EffectHandle, stream: StreamHandle) -> Result<()>;

    /// Point the effect at its model directory.
    fn set_model_dir(&self, effect: EffectHandle, dir: &Path) -> Result<()>;

    /// Select the effect's quality/performance mode.
    fn set_mode(&self, effect: EffectHandle, mode: u32) -> Result<()>;

    /// Bind the image the effect reads each run.
    fn bind_input(&self, effect: EffectHandle, image: ImageHandle) -> Result<()>;

    /// Bind the image the effect writes each run.
    fn bind_output(&self, effect: EffectHandle, image: ImageHandle) -> Result<()>;

    /// (Re)load the effect for the currently bound images.  Required after
    /// any binding or parameter change before the next run.
    fn load_effect(&self, effect: EffectHandle) -> Result<()>;

    /// Execute the effect once on its stream.
    fn run_effect(&self, effect: EffectHandle) -> Result<()>;

    // Images.

    /// Allocate an accelerator-owned image.
    fn alloc_image(&self, size: Size, format: TextureFormat) -> Result<ImageHandle>;

    /// Release an accelerator-owned image.  The image must be unmapped.
    fn dealloc_image(&self, image: ImageHandle) -> Result<()>;

    /// Wrap a host texture so the accelerator can address its memory.
    fn wrap_texture(&self, texture: &TextureHandle) -> Result<ImageHandle>;

    /// Map a wrapped texture for accelerator access.
    fn map_image(&self, image: ImageHandle) -> Result<()>;

    /// Release the mapping established by [`Self::map_image`].
    fn unmap_image(&self, image: ImageHandle) -> Result<()>;

    /// Copy/convert `src` into `dst`, optionally through a staging image when
    /// the two memory layouts cannot be moved directly.
    fn transfer(
        &self,
        src: ImageHandle,
        dst: ImageHandle,
        scale: f32,
        stream: StreamHandle,
        staging: Option<ImageHandle>,
    ) -> Result<()>;

    // Streams.

    /// Create a compute stream.
    fn create_stream(&self) -> Result<StreamHandle>;

    /// Destroy a compute stream.  Infallible by contract.
    fn destroy_stream(&self, stream: StreamHandle);

    /// Block until all work queued on `stream` has completed.
    fn sync_stream(&self, stream: StreamHandle) -> Result<()>;

    /// Human-readable description for a library status code.
    fn error_string(&self, code: i32) -> String;
}
