#![doc = include_str!("../README.md")]

pub mod error;
pub mod host;
pub mod settings;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{MatteError, Result};
pub use host::{graphics_scope, GraphicsScope, HostCompositor};
pub use settings::EffectSettings;
pub use types::{BufferRole, Rect, Size, TextureFormat, TextureHandle};
