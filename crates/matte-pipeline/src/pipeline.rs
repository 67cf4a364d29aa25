//! Per-frame tick/render pipeline.
//!
//! # Frame contract
//!
//! `video_tick` runs once per frame on the render thread: it adopts the
//! host's current target size, derives the output size from the active
//! provider's bounds, and marks the capture cache dirty.  Capture always
//! happens at the input size; the composite cache and the presented quad use
//! the output size.
//! `video_render` may run any number of times per tick; only the first
//! render after a tick captures and processes, later ones re-present the
//! cached composite.  Something is always presented: the cached frame when
//! one exists, otherwise the host is told to draw the source untouched.
//!
//! # Composite recipe
//!
//! The cached frame takes its color channels from the captured input and its
//! alpha channel from the provider's mask, with blending disabled and the
//! full write mask.  No other combination is supported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use matte_core::{
    graphics_scope, BufferRole, EffectSettings, HostCompositor, MatteError, Rect, Result, Size,
    TextureFormat, TextureHandle,
};
use matte_providers::{ProviderId, ProviderRegistry};
use matte_runtime::{ResourcePool, RuntimeContext};

use crate::switch::SwitchController;

/// Atomic per-frame counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Ticks observed.
    pub frames_ticked: AtomicU64,
    /// Renders that presented the cached composite.
    pub frames_presented: AtomicU64,
    /// Renders that ran the provider.
    pub frames_processed: AtomicU64,
    /// Renders that told the host to draw the source untouched.
    pub frames_passthrough: AtomicU64,
    /// Provider runs that failed and fell back to the cache.
    pub process_failures: AtomicU64,
}

impl PipelineMetrics {
    /// Report counters at info level.
    pub fn report(&self) {
        info!(
            ticked = self.frames_ticked.load(Ordering::Relaxed),
            presented = self.frames_presented.load(Ordering::Relaxed),
            processed = self.frames_processed.load(Ordering::Relaxed),
            passthrough = self.frames_passthrough.load(Ordering::Relaxed),
            failures = self.process_failures.load(Ordering::Relaxed),
            "pipeline report"
        );
    }
}

/// The matte effect: capture, segment, composite, present.
pub struct EffectPipeline {
    host: Arc<dyn HostCompositor>,
    pool: Arc<Mutex<ResourcePool>>,
    switcher: SwitchController,
    metrics: Arc<PipelineMetrics>,
    frame_size: Size,
    /// Size the pipeline presents at: the frame size run through the active
    /// provider's output bounds.
    out_size: Size,
    dirty: bool,
    /// Pipeline-owned composite target; sized to the frame.
    cache: Option<TextureHandle>,
    cache_valid: bool,
    shut_down: bool,
}

impl EffectPipeline {
    /// Build a pipeline over the process-wide runtime and the built-in
    /// provider registry.
    pub fn new(host: Arc<dyn HostCompositor>) -> Result<Self> {
        let runtime = RuntimeContext::acquire()?;
        Self::with_runtime(host, runtime, Arc::new(ProviderRegistry::with_builtin()))
    }

    /// Build a pipeline over an explicit runtime and registry.
    pub fn with_runtime(
        host: Arc<dyn HostCompositor>,
        runtime: Arc<RuntimeContext>,
        registry: Arc<ProviderRegistry>,
    ) -> Result<Self> {
        let pool = Arc::new(Mutex::new(ResourcePool::new(Arc::clone(&runtime))));
        let switcher = SwitchController::new(
            Arc::clone(&runtime),
            registry,
            Arc::clone(&host),
            Arc::clone(&pool),
        )
        .map_err(|err| MatteError::Host {
            call: "switch worker",
            detail: err.to_string(),
        })?;

        // Minimal buffers exist from the start so the first real frame only
        // resizes instead of allocating from nothing.
        let cache = {
            let _scope = graphics_scope(host.as_ref());
            let mut pool = pool.lock().unwrap();
            pool.ensure(host.as_ref(), BufferRole::Input, Size::MIN)?;
            Some(host.create_texture(Size::MIN, TextureFormat::Rgba8)?)
        };

        Ok(Self {
            host,
            pool,
            switcher,
            metrics: Arc::new(PipelineMetrics::default()),
            frame_size: Size::MIN,
            out_size: Size::MIN,
            dirty: true,
            cache,
            cache_valid: false,
            shut_down: false,
        })
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn pool(&self) -> Arc<Mutex<ResourcePool>> {
        Arc::clone(&self.pool)
    }

    /// Size the host should report for this effect's output.  Matches the
    /// input until the active provider's bounds constrain it.
    pub fn output_size(&self) -> Size {
        self.out_size
    }

    /// Provider the pipeline is switched to (or switching to).
    pub fn active_provider(&self) -> ProviderId {
        self.switcher.active()
    }

    /// Whether the active provider is loaded and processing frames.
    pub fn provider_ready(&self) -> bool {
        self.switcher.ready()
    }

    /// Apply a settings blob.  A changed provider triggers an asynchronous
    /// switch; the render path is never blocked here.
    pub fn update(&mut self, settings: &EffectSettings) {
        let requested = ProviderId::from_settings(settings.provider);
        self.switcher.request_switch(requested);
    }

    /// Per-frame bookkeeping.  Adopts the host's target size, asks the ready
    /// provider for the constrained output size, and marks the capture cache
    /// dirty.
    pub fn video_tick(&mut self) {
        self.metrics.frames_ticked.fetch_add(1, Ordering::Relaxed);
        let size = self.host.target_size();
        if size != self.frame_size {
            debug!(old = %self.frame_size, new = %size, "frame size changed");
            self.frame_size = size;
            self.cache_valid = false;
        }
        let out = self
            .switcher
            .with_ready_adapter(|adapter, _| adapter.bounds().constrain(size))
            .unwrap_or(size);
        if out != self.out_size {
            debug!(input = %size, output = %out, "output size changed");
            self.out_size = out;
            self.cache_valid = false;
        }
        self.dirty = true;
    }

    /// Render one frame.
    pub fn video_render(&mut self) {
        let size = self.frame_size;
        if size.is_empty() || !self.switcher.ready() {
            self.pass_through();
            return;
        }

        let host = Arc::clone(&self.host);
        let _scope = graphics_scope(host.as_ref());

        if self.dirty {
            match self.refresh_cache(host.as_ref(), size) {
                Ok(true) => {
                    self.dirty = false;
                    self.cache_valid = true;
                    self.metrics.frames_processed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    // Host declined the capture; nothing new to show.
                }
                Err(err) => {
                    self.metrics.process_failures.fetch_add(1, Ordering::Relaxed);
                    if err.is_recoverable() {
                        debug!(error = %err, "frame processing produced no result");
                    } else {
                        // Latch the provider out of service until the next
                        // switch; repeating a hard failure every frame only
                        // floods the log.
                        warn!(error = %err, "frame processing failed; provider disabled until next switch");
                        self.switcher.mark_not_ready();
                    }
                }
            }
        }

        if self.cache_valid {
            if let Some(cache) = &self.cache {
                if let Err(err) = host.present(cache, Rect::full(self.out_size)) {
                    warn!(error = %err, "present failed");
                }
                self.metrics.frames_presented.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.pass_through();
    }

    fn pass_through(&self) {
        self.host.skip_frame();
        self.metrics.frames_passthrough.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture, process and composite one frame into the cache.  `Ok(false)`
    /// means the host had no frame to capture.
    fn refresh_cache(&mut self, host: &dyn HostCompositor, size: Size) -> Result<bool> {
        let cache = self.ensure_cache(host, self.out_size)?;

        let input = {
            let mut pool = self.pool.lock().unwrap();
            let input = pool.ensure(host, BufferRole::Input, size)?;
            let Some(frame) = host.capture_frame(size)? else {
                return Ok(false);
            };
            let copied = host.copy_texture(&input.texture, &frame);
            host.destroy_texture(&frame);
            copied?;
            input.texture
        };

        let processed = self
            .switcher
            .with_ready_adapter(|adapter, pool| -> Result<TextureHandle> {
                adapter.resize(host, pool, size)?;
                adapter.run_load_if_dirty()?;
                adapter.process(host, pool)
            });

        match processed {
            Some(Ok(mask)) => {
                host.composite_mask(&input, &mask, &cache)?;
                Ok(true)
            }
            Some(Err(err)) => Err(err),
            // The provider went away between the ready check and the lock.
            None => Err(MatteError::NoResult {
                provider: self.switcher.active().to_string(),
            }),
        }
    }

    fn ensure_cache(&mut self, host: &dyn HostCompositor, size: Size) -> Result<TextureHandle> {
        if let Some(cache) = &self.cache {
            if cache.size == size {
                return Ok(cache.clone());
            }
            host.destroy_texture(cache);
            self.cache = None;
            self.cache_valid = false;
        }
        let cache = host.create_texture(size, TextureFormat::Rgba8)?;
        self.cache = Some(cache.clone());
        Ok(cache)
    }

    /// Unload the provider, drain the pool and drop the cache.  Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.switcher.shutdown();
        let _scope = graphics_scope(self.host.as_ref());
        let mut pool = self.pool.lock().unwrap();
        pool.release_all(self.host.as_ref());
        pool.report();
        if let Some(cache) = self.cache.take() {
            self.host.destroy_texture(&cache);
        }
        self.cache_valid = false;
        self.metrics.report();
    }
}

impl Drop for EffectPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
