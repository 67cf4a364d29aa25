#![doc = include_str!("../README.md")]

pub mod pipeline;
pub mod switch;

pub use pipeline::{EffectPipeline, PipelineMetrics};
pub use switch::SwitchController;
