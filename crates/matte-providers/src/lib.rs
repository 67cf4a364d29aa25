#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod background;
pub mod bounds;
pub mod id;
pub mod registry;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use adapter::{AdapterFactory, ProviderAdapter};
pub use bounds::SizeBounds;
pub use id::ProviderId;
pub use registry::ProviderRegistry;
