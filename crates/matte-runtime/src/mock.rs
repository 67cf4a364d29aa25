//! In-memory [`AcceleratorApi`] double for tests.
//!
//! Mints handles, tracks image/effect/stream lifetimes, counts every call,
//! and supports one-shot failure injection by method name so suites can walk
//! error paths without a GPU.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use matte_core::{MatteError, Result, Size, TextureFormat, TextureHandle};

use crate::api::{AcceleratorApi, EffectHandle, ImageHandle, StreamHandle};

/// Per-method call counters.
#[derive(Default)]
pub struct CallCounts {
    pub create_effect: AtomicU64,
    pub destroy_effect: AtomicU64,
    pub load_effect: AtomicU64,
    pub run_effect: AtomicU64,
    pub alloc_image: AtomicU64,
    pub dealloc_image: AtomicU64,
    pub wrap_texture: AtomicU64,
    pub map_image: AtomicU64,
    pub unmap_image: AtomicU64,
    pub transfer: AtomicU64,
    pub sync_stream: AtomicU64,
}

#[derive(Default)]
struct MockState {
    effects: HashSet<u64>,
    images: HashMap<u64, (Size, TextureFormat)>,
    mapped: HashSet<u64>,
    streams: HashSet<u64>,
    model_dirs: HashMap<u64, PathBuf>,
    bound_inputs: HashMap<u64, u64>,
    bound_outputs: HashMap<u64, u64>,
    fail_next: HashMap<&'static str, i32>,
}

/// Scripted accelerator.
pub struct MockAccelerator {
    next_id: AtomicU64,
    state: Mutex<MockState>,
    pub calls: CallCounts,
}

impl Default for MockAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAccelerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
            calls: CallCounts::default(),
        }
    }

    /// Make the next call named `method` fail with `code`.
    pub fn fail_next(&self, method: &'static str, code: i32) {
        self.state.lock().unwrap().fail_next.insert(method, code);
    }

    /// Images currently allocated and not deallocated.
    pub fn live_images(&self) -> usize {
        self.state.lock().unwrap().images.len()
    }

    /// Effects currently created and not destroyed.
    pub fn live_effects(&self) -> usize {
        self.state.lock().unwrap().effects.len()
    }

    /// Model directory last configured for `effect`, if any.
    pub fn model_dir(&self, effect: EffectHandle) -> Option<PathBuf> {
        self.state.lock().unwrap().model_dirs.get(&effect.0).cloned()
    }

    fn mint(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn take_failure(&self, method: &'static str) -> Option<i32> {
        self.state.lock().unwrap().fail_next.remove(method)
    }

    fn provider_failure(&self, method: &'static str) -> Result<()> {
        match self.take_failure(method) {
            Some(code) => Err(MatteError::Provider {
                call: method,
                code,
                detail: self.error_string(code),
            }),
            None => Ok(()),
        }
    }

    fn resource_failure(&self, method: &'static str) -> Result<()> {
        match self.take_failure(method) {
            Some(code) => Err(MatteError::Resource {
                call: method,
                code,
                detail: self.error_string(code),
            }),
            None => Ok(()),
        }
    }

    fn known_effect(&self, effect: EffectHandle) -> Result<()> {
        if self.state.lock().unwrap().effects.contains(&effect.0) {
            Ok(())
        } else {
            Err(MatteError::InvariantViolation(format!(
                "unknown effect handle {}",
                effect.0
            )))
        }
    }

    fn known_image(&self, image: ImageHandle) -> Result<()> {
        if self.state.lock().unwrap().images.contains_key(&image.0) {
            Ok(())
        } else {
            Err(MatteError::InvariantViolation(format!(
                "unknown image handle {}",
                image.0
            )))
        }
    }
}

impl AcceleratorApi for MockAccelerator {
    fn create_effect(&self, _effect_id: &str) -> Result<EffectHandle> {
        self.calls.create_effect.fetch_add(1, Ordering::Relaxed);
        self.provider_failure("create_effect")?;
        let id = self.mint();
        self.state.lock().unwrap().effects.insert(id);
        Ok(EffectHandle(id))
    }

    fn destroy_effect(&self, effect: EffectHandle) {
        self.calls.destroy_effect.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        state.effects.remove(&effect.0);
        state.model_dirs.remove(&effect.0);
        state.bound_inputs.remove(&effect.0);
        state.bound_outputs.remove(&effect.0);
    }

    fn set_stream(&self, effect: EffectHandle, stream: StreamHandle) -> Result<()> {
        self.provider_failure("set_stream")?;
        self.known_effect(effect)?;
        if self.state.lock().unwrap().streams.contains(&stream.0) {
            Ok(())
        } else {
            Err(MatteError::InvariantViolation(format!(
                "unknown stream handle {}",
                stream.0
            )))
        }
    }

    fn set_model_dir(&self, effect: EffectHandle, dir: &Path) -> Result<()> {
        self.provider_failure("set_model_dir")?;
        self.known_effect(effect)?;
        self.state
            .lock()
            .unwrap()
            .model_dirs
            .insert(effect.0, dir.to_path_buf());
        Ok(())
    }

    fn set_mode(&self, effect: EffectHandle, _mode: u32) -> Result<()> {
        self.provider_failure("set_mode")?;
        self.known_effect(effect)
    }

    fn bind_input(&self, effect: EffectHandle, image: ImageHandle) -> Result<()> {
        self.provider_failure("bind_input")?;
        self.known_effect(effect)?;
        self.known_image(image)?;
        self.state
            .lock()
            .unwrap()
            .bound_inputs
            .insert(effect.0, image.0);
        Ok(())
    }

    fn bind_output(&self, effect: EffectHandle, image: ImageHandle) -> Result<()> {
        self.provider_failure("bind_output")?;
        self.known_effect(effect)?;
        self.known_image(image)?;
        self.state
            .lock()
            .unwrap()
            .bound_outputs
            .insert(effect.0, image.0);
        Ok(())
    }

    fn load_effect(&self, effect: EffectHandle) -> Result<()> {
        self.calls.load_effect.fetch_add(1, Ordering::Relaxed);
        self.provider_failure("load_effect")?;
        self.known_effect(effect)
    }

    fn run_effect(&self, effect: EffectHandle) -> Result<()> {
        self.calls.run_effect.fetch_add(1, Ordering::Relaxed);
        self.provider_failure("run_effect")?;
        self.known_effect(effect)?;
        let state = self.state.lock().unwrap();
        if !state.bound_inputs.contains_key(&effect.0) || !state.bound_outputs.contains_key(&effect.0)
        {
            return Err(MatteError::InvariantViolation(
                "run_effect with unbound images".into(),
            ));
        }
        Ok(())
    }

    fn alloc_image(&self, size: Size, format: TextureFormat) -> Result<ImageHandle> {
        self.calls.alloc_image.fetch_add(1, Ordering::Relaxed);
        self.resource_failure("alloc_image")?;
        let id = self.mint();
        self.state.lock().unwrap().images.insert(id, (size, format));
        Ok(ImageHandle(id))
    }

    fn dealloc_image(&self, image: ImageHandle) -> Result<()> {
        self.calls.dealloc_image.fetch_add(1, Ordering::Relaxed);
        self.resource_failure("dealloc_image")?;
        let mut state = self.state.lock().unwrap();
        if state.mapped.contains(&image.0) {
            return Err(MatteError::InvariantViolation(format!(
                "dealloc of mapped image {}",
                image.0
            )));
        }
        if state.images.remove(&image.0).is_none() {
            return Err(MatteError::InvariantViolation(format!(
                "unknown image handle {}",
                image.0
            )));
        }
        Ok(())
    }

    fn wrap_texture(&self, texture: &TextureHandle) -> Result<ImageHandle> {
        self.calls.wrap_texture.fetch_add(1, Ordering::Relaxed);
        self.resource_failure("wrap_texture")?;
        let id = self.mint();
        self.state
            .lock()
            .unwrap()
            .images
            .insert(id, (texture.size, texture.format));
        Ok(ImageHandle(id))
    }

    fn map_image(&self, image: ImageHandle) -> Result<()> {
        self.calls.map_image.fetch_add(1, Ordering::Relaxed);
        self.resource_failure("map_image")?;
        self.known_image(image)?;
        self.state.lock().unwrap().mapped.insert(image.0);
        Ok(())
    }

    fn unmap_image(&self, image: ImageHandle) -> Result<()> {
        self.calls.unmap_image.fetch_add(1, Ordering::Relaxed);
        self.resource_failure("unmap_image")?;
        let mut state = self.state.lock().unwrap();
        if !state.mapped.remove(&image.0) {
            return Err(MatteError::InvariantViolation(format!(
                "unmap of unmapped image {}",
                image.0
            )));
        }
        Ok(())
    }

    fn transfer(
        &self,
        src: ImageHandle,
        dst: ImageHandle,
        _scale: f32,
        stream: StreamHandle,
        staging: Option<ImageHandle>,
    ) -> Result<()> {
        self.calls.transfer.fetch_add(1, Ordering::Relaxed);
        self.resource_failure("transfer")?;
        self.known_image(src)?;
        self.known_image(dst)?;
        if let Some(tmp) = staging {
            self.known_image(tmp)?;
        }
        if self.state.lock().unwrap().streams.contains(&stream.0) {
            Ok(())
        } else {
            Err(MatteError::InvariantViolation(format!(
                "unknown stream handle {}",
                stream.0
            )))
        }
    }

    fn create_stream(&self) -> Result<StreamHandle> {
        self.resource_failure("create_stream")?;
        let id = self.mint();
        self.state.lock().unwrap().streams.insert(id);
        Ok(StreamHandle(id))
    }

    fn destroy_stream(&self, stream: StreamHandle) {
        self.state.lock().unwrap().streams.remove(&stream.0);
    }

    fn sync_stream(&self, stream: StreamHandle) -> Result<()> {
        self.calls.sync_stream.fetch_add(1, Ordering::Relaxed);
        self.resource_failure("sync_stream")?;
        if self.state.lock().unwrap().streams.contains(&stream.0) {
            Ok(())
        } else {
            Err(MatteError::InvariantViolation(format!(
                "unknown stream handle {}",
                stream.0
            )))
        }
    }

    fn error_string(&self, code: i32) -> String {
        format!("mock status {code}")
    }
}
