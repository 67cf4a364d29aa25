//! In-memory [`HostCompositor`] double for tests.
//!
//! Records every GPU-facing call so suites can assert on capture, composite,
//! present, and skip behavior without a real compositor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::host::HostCompositor;
use crate::types::{Rect, Size, TextureFormat, TextureHandle};

/// One recorded host-boundary call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    Capture(Size),
    Copy { dst: u64, src: u64 },
    Composite { color: u64, mask: u64, dst: u64 },
    Present { texture: u64, dst: Rect },
    Skip,
}

/// Scripted host compositor.  Thread-safe; all state behind locks/atomics so
/// switch tasks and the "render thread" of a test can share it.
pub struct MockCompositor {
    target: Mutex<Size>,
    next_id: AtomicU64,
    decline_capture: AtomicBool,
    graphics_depth: AtomicU64,
    live_textures: Mutex<Vec<u64>>,
    events: Mutex<Vec<HostEvent>>,
}

impl MockCompositor {
    pub fn new(target: Size) -> Self {
        Self {
            target: Mutex::new(target),
            next_id: AtomicU64::new(1),
            decline_capture: AtomicBool::new(false),
            graphics_depth: AtomicU64::new(0),
            live_textures: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Change the reported target size (simulates an upstream resize).
    pub fn set_target_size(&self, size: Size) {
        *self.target.lock().unwrap() = size;
    }

    /// Make subsequent `capture_frame` calls return `Ok(None)`.
    pub fn set_decline_capture(&self, decline: bool) {
        self.decline_capture.store(decline, Ordering::Relaxed);
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Number of textures created but not yet destroyed.
    pub fn live_texture_count(&self) -> usize {
        self.live_textures.lock().unwrap().len()
    }

    /// Count of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&HostEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: HostEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn mint(&self, size: Size, format: TextureFormat) -> TextureHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live_textures.lock().unwrap().push(id);
        TextureHandle { id, size, format }
    }
}

impl HostCompositor for MockCompositor {
    fn target_size(&self) -> Size {
        *self.target.lock().unwrap()
    }

    fn enter_graphics(&self) {
        self.graphics_depth.fetch_add(1, Ordering::AcqRel);
    }

    fn leave_graphics(&self) {
        let prev = self.graphics_depth.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "leave_graphics without matching enter_graphics");
    }

    fn create_texture(&self, size: Size, format: TextureFormat) -> Result<TextureHandle> {
        Ok(self.mint(size, format))
    }

    fn destroy_texture(&self, texture: &TextureHandle) {
        self.live_textures.lock().unwrap().retain(|id| *id != texture.id);
    }

    fn capture_frame(&self, size: Size) -> Result<Option<TextureHandle>> {
        if self.decline_capture.load(Ordering::Relaxed) {
            return Ok(None);
        }
        self.record(HostEvent::Capture(size));
        Ok(Some(self.mint(size, TextureFormat::Rgba8)))
    }

    fn copy_texture(&self, dst: &TextureHandle, src: &TextureHandle) -> Result<()> {
        self.record(HostEvent::Copy {
            dst: dst.id,
            src: src.id,
        });
        Ok(())
    }

    fn composite_mask(
        &self,
        color: &TextureHandle,
        mask: &TextureHandle,
        dst: &TextureHandle,
    ) -> Result<()> {
        self.record(HostEvent::Composite {
            color: color.id,
            mask: mask.id,
            dst: dst.id,
        });
        Ok(())
    }

    fn present(&self, texture: &TextureHandle, dst: Rect) -> Result<()> {
        self.record(HostEvent::Present {
            texture: texture.id,
            dst,
        });
        Ok(())
    }

    fn skip_frame(&self) {
        self.record(HostEvent::Skip);
    }
}

#[cfg(test)]
mod tests {
    use super::{HostEvent, MockCompositor};
    use crate::host::{graphics_scope, HostCompositor};
    use crate::types::Size;

    #[test]
    fn declined_capture_yields_none() {
        let host = MockCompositor::new(Size::new(1280, 720));
        host.set_decline_capture(true);
        assert!(host.capture_frame(Size::new(1280, 720)).unwrap().is_none());
        assert!(host.events().is_empty());
    }

    #[test]
    fn graphics_scope_balances_enter_and_leave() {
        let host = MockCompositor::new(Size::new(1, 1));
        {
            let _scope = graphics_scope(&host);
            let _nested = graphics_scope(&host);
        }
        // Unbalanced usage would have panicked in leave_graphics.
        host.skip_frame();
        assert_eq!(host.events(), vec![HostEvent::Skip]);
    }
}
