//! Process-wide shared runtime context.
//!
//! One accelerator instance and one compute stream serve every pipeline in
//! the process.  The context is handed out as an `Arc` through a weak
//! reference: the last pipeline to drop its clone tears the runtime down,
//! and the next acquire builds a fresh one.

use std::sync::{Arc, Mutex, Weak};

use tracing::info;

use matte_core::Result;

use crate::api::{AcceleratorApi, StreamHandle};

static SHARED: Mutex<Weak<RuntimeContext>> = Mutex::new(Weak::new());

/// Loaded accelerator plus the compute stream all effect work runs on.
pub struct RuntimeContext {
    api: Arc<dyn AcceleratorApi>,
    stream: StreamHandle,
}

impl RuntimeContext {
    /// Get the shared context, loading the accelerator libraries on first
    /// use.  Fails with [`matte_core::MatteError::Unavailable`] when the
    /// runtime cannot be loaded on this machine.
    #[cfg(target_os = "linux")]
    pub fn acquire() -> Result<Arc<Self>> {
        let mut shared = SHARED.lock().unwrap();
        if let Some(ctx) = shared.upgrade() {
            return Ok(ctx);
        }
        let api: Arc<dyn AcceleratorApi> = Arc::new(crate::nvvfx::VfxAccelerator::load()?);
        let ctx = Self::build(api)?;
        info!("video effects runtime loaded");
        *shared = Arc::downgrade(&ctx);
        Ok(ctx)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn acquire() -> Result<Arc<Self>> {
        Err(matte_core::MatteError::Unavailable(
            "video effects runtime is only supported on Linux".into(),
        ))
    }

    /// Build a context over an explicit accelerator.  Used by tests and by
    /// hosts that embed their own accelerator implementation; the instance
    /// is not registered as the process-wide shared context.
    pub fn with_api(api: Arc<dyn AcceleratorApi>) -> Result<Arc<Self>> {
        Self::build(api)
    }

    fn build(api: Arc<dyn AcceleratorApi>) -> Result<Arc<Self>> {
        let stream = api.create_stream()?;
        Ok(Arc::new(Self { api, stream }))
    }

    pub fn api(&self) -> &Arc<dyn AcceleratorApi> {
        &self.api
    }

    /// The shared compute stream.
    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    /// Block until all queued compute work has completed.
    pub fn sync(&self) -> Result<()> {
        self.api.sync_stream(self.stream)
    }
}

impl Drop for RuntimeContext {
    fn drop(&mut self) {
        self.api.destroy_stream(self.stream);
    }
}
