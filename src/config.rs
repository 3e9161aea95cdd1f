use serde::Deserialize;
use std::path::Path;

use crate::dsp::gain::{self, DEFAULT_AMPLIFICATION, DEFAULT_MAX_DB, DEFAULT_MIN_DB};
use crate::dsp::scale::ScaleType;
use crate::dsp::window::WindowType;
use crate::error::{Result, SpectrumError};
use crate::pipeline::transform::validate_transform_size;

pub const DEFAULT_TRANSFORM_SIZE: usize = 2048;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Settings file layout (`spectra.toml`).
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub gain: GainConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_transform_size")]
    pub transform_size: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub window: WindowType,
    #[serde(default)]
    pub scale: ScaleType,
}

#[derive(Debug, Deserialize)]
pub struct GainConfig {
    #[serde(default = "default_min_db")]
    pub min_db: f32,
    #[serde(default = "default_max_db")]
    pub max_db: f32,
    #[serde(default = "default_amplification")]
    pub amplification: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            transform_size: default_transform_size(),
            queue_capacity: default_queue_capacity(),
            window: WindowType::default(),
            scale: ScaleType::default(),
        }
    }
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            min_db: default_min_db(),
            max_db: default_max_db(),
            amplification: default_amplification(),
        }
    }
}

fn default_transform_size() -> usize { DEFAULT_TRANSFORM_SIZE }
fn default_queue_capacity() -> usize { DEFAULT_QUEUE_CAPACITY }
fn default_min_db() -> f32 { DEFAULT_MIN_DB }
fn default_max_db() -> f32 { DEFAULT_MAX_DB }
fn default_amplification() -> f32 { DEFAULT_AMPLIFICATION }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Ignoring malformed config {}: {}", path.display(), err);
            None
        }
    }
}

/// Construction parameters for [`crate::AnalysisPipeline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub transform_size: usize,
    pub queue_capacity: usize,
    pub window: WindowType,
    pub scale: ScaleType,
    pub min_db: f32,
    pub max_db: f32,
    pub amplification: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transform_size: DEFAULT_TRANSFORM_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            window: WindowType::default(),
            scale: ScaleType::default(),
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
            amplification: DEFAULT_AMPLIFICATION,
        }
    }
}

impl PipelineConfig {
    pub fn with_transform_size(mut self, transform_size: usize) -> Self {
        self.transform_size = transform_size;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_window(mut self, window: WindowType) -> Self {
        self.window = window;
        self
    }

    pub fn with_scale(mut self, scale: ScaleType) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_gain(mut self, min_db: f32, max_db: f32, amplification: f32) -> Self {
        self.min_db = min_db;
        self.max_db = max_db;
        self.amplification = amplification;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_transform_size(self.transform_size)?;
        if self.queue_capacity == 0 {
            return Err(SpectrumError::config("queue capacity must be at least 1"));
        }
        gain::validate_range(self.min_db, self.max_db)?;
        gain::validate_amplification(self.amplification)?;
        Ok(())
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            transform_size: config.analysis.transform_size,
            queue_capacity: config.analysis.queue_capacity,
            window: config.analysis.window,
            scale: config.analysis.scale,
            min_db: config.gain.min_db,
            max_db: config.gain.max_db,
            amplification: config.gain.amplification,
        }
    }
}
