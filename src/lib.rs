//! Real-time spectrum analysis: a stream of mono samples in, normalized
//! magnitude spectra on a linear or perceptual frequency axis out.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod pipeline;

pub use config::PipelineConfig;
pub use dsp::{GainParameters, GainSnapshot, ScaleType, WindowType};
pub use error::{Result, SpectrumError};
pub use pipeline::{AnalysisPipeline, PipelineStats, SpectralData};
