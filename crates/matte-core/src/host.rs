//! Host-compositor contract.
//!
//! The host drives the pipeline once per video tick and supplies all GPU
//! texture operations.  This trait is the neutral home that keeps the core
//! free of any specific host ABI: plugin glue implements it on one side,
//! the pipeline calls it on the other.

use crate::error::Result;
use crate::types::{Rect, Size, TextureFormat, TextureHandle};

/// Narrow call surface the core needs from the host compositor.
///
/// All methods are invoked either on the host's render thread or inside a
/// switch task that holds the graphics scope, so implementations must be
/// `Send + Sync` but may assume GPU calls are externally serialized by
/// [`graphics_scope`].
pub trait HostCompositor: Send + Sync {
    /// Current target dimensions, queried once per tick.
    fn target_size(&self) -> Size;

    /// Enter the host's graphics context.  Paired with [`leave_graphics`]
    /// via [`graphics_scope`]; GPU objects may only be created, resized, or
    /// destroyed between the two calls.
    ///
    /// [`leave_graphics`]: HostCompositor::leave_graphics
    fn enter_graphics(&self);

    /// Leave the host's graphics context.
    fn leave_graphics(&self);

    /// Allocate a GPU texture of the given size and format.
    fn create_texture(&self, size: Size, format: TextureFormat) -> Result<TextureHandle>;

    /// Destroy a texture previously minted by [`create_texture`].
    ///
    /// [`create_texture`]: HostCompositor::create_texture
    fn destroy_texture(&self, texture: &TextureHandle);

    /// Capture the current frame into a color buffer of the requested size.
    ///
    /// Wraps the host's begin/end capture pair; the target is cleared to
    /// transparent black before the frame is rendered into it.  Returns
    /// `Ok(None)` when the host declined the capture (the frame must then
    /// pass through unmodified).
    fn capture_frame(&self, size: Size) -> Result<Option<TextureHandle>>;

    /// GPU-side copy of `src` into `dst`.  Formats and sizes must match.
    fn copy_texture(&self, dst: &TextureHandle, src: &TextureHandle) -> Result<()>;

    /// Composite `mask` over `color` into `dst` with the fixed channel-mask
    /// recipe: alpha sourced exclusively from the mask's alpha, color
    /// channels from `color`, blending disabled, full write mask.
    fn composite_mask(
        &self,
        color: &TextureHandle,
        mask: &TextureHandle,
        dst: &TextureHandle,
    ) -> Result<()>;

    /// Present `texture` as a textured quad covering `dst`.
    fn present(&self, texture: &TextureHandle, dst: Rect) -> Result<()>;

    /// Tell the host to pass the current frame through unmodified.
    fn skip_frame(&self);
}

/// RAII scope over [`HostCompositor::enter_graphics`] /
/// [`HostCompositor::leave_graphics`].
pub struct GraphicsScope<'a> {
    host: &'a dyn HostCompositor,
}

impl Drop for GraphicsScope<'_> {
    fn drop(&mut self) {
        self.host.leave_graphics();
    }
}

/// Enter the host graphics context for the lifetime of the returned guard.
pub fn graphics_scope(host: &dyn HostCompositor) -> GraphicsScope<'_> {
    host.enter_graphics();
    GraphicsScope { host }
}
