#![doc = include_str!("../README.md")]

pub mod api;
pub mod context;
#[cfg(target_os = "linux")]
pub mod nvvfx;
pub mod pool;
pub mod status;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use api::{AcceleratorApi, EffectHandle, ImageHandle, StreamHandle};
pub use context::RuntimeContext;
pub use pool::{PoolEntry, PoolStats, ResourcePool};
