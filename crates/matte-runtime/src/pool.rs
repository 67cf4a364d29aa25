//! Role-keyed GPU buffer pool.
//!
//! Every buffer the pipeline touches lives here under a [`BufferRole`].  A
//! role holds at most one buffer; [`ResourcePool::ensure`] reuses it while
//! the requested size matches and runs a full release/reallocate cycle when
//! it does not.  Each buffer is a host texture wrapped and mapped into the
//! accelerator, and teardown strictly unmaps before deallocating.
//!
//! A failed ensure never leaves a half-built buffer behind: whatever was
//! already created is torn down and the role reads as empty.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use matte_core::{BufferRole, HostCompositor, Result, Size, TextureHandle};

use crate::api::ImageHandle;
use crate::context::RuntimeContext;

/// Lock-free pool cycle counters.
#[derive(Default)]
pub struct PoolStats {
    /// Completed allocate cycles (texture + wrap + map).
    pub allocations: AtomicU64,
    /// Ensures satisfied by an existing same-size buffer.
    pub reuses: AtomicU64,
    /// Completed release cycles (unmap + dealloc + destroy).
    pub releases: AtomicU64,
    /// Ensures that failed partway and rolled back.
    pub failures: AtomicU64,
}

impl PoolStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.allocations.load(Ordering::Relaxed),
            self.reuses.load(Ordering::Relaxed),
            self.releases.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

/// A live pooled buffer: the host texture and its accelerator mapping.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub texture: TextureHandle,
    pub image: ImageHandle,
}

/// Lazily allocated, role-keyed buffer pool.
///
/// Not internally synchronized; the owning pipeline serializes access the
/// same way it serializes the rest of its render-thread state.
pub struct ResourcePool {
    runtime: Arc<RuntimeContext>,
    entries: HashMap<BufferRole, PoolEntry>,
    pub stats: PoolStats,
}

impl ResourcePool {
    pub fn new(runtime: Arc<RuntimeContext>) -> Self {
        Self {
            runtime,
            entries: HashMap::new(),
            stats: PoolStats::default(),
        }
    }

    /// Return the buffer for `role` at exactly `size`, reusing the existing
    /// buffer when its size already matches and reallocating otherwise.
    pub fn ensure(
        &mut self,
        host: &dyn HostCompositor,
        role: BufferRole,
        size: Size,
    ) -> Result<PoolEntry> {
        if let Some(entry) = self.entries.get(&role) {
            if entry.texture.size == size {
                self.stats.reuses.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.clone());
            }
            debug!(?role, old = %entry.texture.size, new = %size, "pool buffer resize");
            self.release(host, role);
        }

        let entry = match self.allocate(host, role, size) {
            Ok(entry) => entry,
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(role, entry.clone());
        Ok(entry)
    }

    fn allocate(
        &self,
        host: &dyn HostCompositor,
        role: BufferRole,
        size: Size,
    ) -> Result<PoolEntry> {
        let api = self.runtime.api();
        let texture = host.create_texture(size, role.format())?;
        let image = match api.wrap_texture(&texture) {
            Ok(image) => image,
            Err(err) => {
                host.destroy_texture(&texture);
                return Err(err);
            }
        };
        if let Err(err) = api.map_image(image) {
            if let Err(dealloc_err) = api.dealloc_image(image) {
                warn!(?role, error = %dealloc_err, "image cleanup failed after map failure");
            }
            host.destroy_texture(&texture);
            return Err(err);
        }
        Ok(PoolEntry { texture, image })
    }

    /// Currently pooled buffer for `role`, if any.
    pub fn entry(&self, role: BufferRole) -> Option<&PoolEntry> {
        self.entries.get(&role)
    }

    /// Tear down the buffer for `role`.  Unmap failures are logged and do
    /// not stop the deallocation.
    pub fn release(&mut self, host: &dyn HostCompositor, role: BufferRole) {
        let Some(entry) = self.entries.remove(&role) else {
            return;
        };
        let api = self.runtime.api();
        if let Err(err) = api.unmap_image(entry.image) {
            warn!(?role, error = %err, "image unmap failed during release");
        }
        if let Err(err) = api.dealloc_image(entry.image) {
            warn!(?role, error = %err, "image dealloc failed during release");
        }
        host.destroy_texture(&entry.texture);
        self.stats.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Tear down every pooled buffer.
    pub fn release_all(&mut self, host: &dyn HostCompositor) {
        for role in BufferRole::ALL {
            self.release(host, role);
        }
    }

    /// Number of live pooled buffers.
    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    /// Log cycle counters.
    pub fn report(&self) {
        let (allocations, reuses, releases, failures) = self.stats.snapshot();
        info!(
            allocations,
            reuses,
            releases,
            failures,
            outstanding = self.entries.len(),
            "resource pool report"
        );
    }
}
