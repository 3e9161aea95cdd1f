use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::fft::RawSpectrumResult;
use super::gain::GainSnapshot;
use crate::error::{Result, SpectrumError};

const SILENCE_THRESHOLD: f32 = 1e-6;
const LOWEST_FREQUENCY_HZ: f32 = 1.0;
const BARK_MAX_HZ: f64 = 100_000.0;
const BARK_SOLVER_STEPS: usize = 64;

/// Frequency axis the output bins are spread over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    Linear,
    #[default]
    #[serde(alias = "log")]
    Logarithmic,
    Mel,
    Bark,
    #[serde(alias = "ERB")]
    Erb,
}

impl ScaleType {
    pub const ALL: [ScaleType; 5] = [
        ScaleType::Linear,
        ScaleType::Logarithmic,
        ScaleType::Mel,
        ScaleType::Bark,
        ScaleType::Erb,
    ];

    pub fn index(self) -> usize {
        match self {
            ScaleType::Linear => 0,
            ScaleType::Logarithmic => 1,
            ScaleType::Mel => 2,
            ScaleType::Bark => 3,
            ScaleType::Erb => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleType::Linear => "linear",
            ScaleType::Logarithmic => "logarithmic",
            ScaleType::Mel => "mel",
            ScaleType::Bark => "bark",
            ScaleType::Erb => "erb",
        }
    }

    /// Maps a frequency in Hz onto this scale's domain.
    pub fn forward(self, hz: f32) -> f32 {
        let f = hz as f64;
        let value = match self {
            ScaleType::Linear => f,
            ScaleType::Logarithmic => f.log10(),
            ScaleType::Mel => 2595.0 * (1.0 + f / 700.0).log10(),
            ScaleType::Bark => hz_to_bark(f),
            ScaleType::Erb => 21.4 * (0.00437 * f + 1.0).log10(),
        };
        value as f32
    }

    /// Maps a domain value back to Hz.
    pub fn inverse(self, value: f32) -> f32 {
        let x = value as f64;
        let hz = match self {
            ScaleType::Linear => x,
            ScaleType::Logarithmic => 10f64.powf(x),
            ScaleType::Mel => 700.0 * (10f64.powf(x / 2595.0) - 1.0),
            ScaleType::Bark => bark_to_hz(x),
            ScaleType::Erb => (10f64.powf(x / 21.4) - 1.0) / 0.00437,
        };
        hz as f32
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScaleType {
    type Err = SpectrumError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "lin" => Ok(ScaleType::Linear),
            "logarithmic" | "log" => Ok(ScaleType::Logarithmic),
            "mel" => Ok(ScaleType::Mel),
            "bark" => Ok(ScaleType::Bark),
            "erb" => Ok(ScaleType::Erb),
            other => Err(SpectrumError::config(format!("unsupported scale type '{}'", other))),
        }
    }
}

fn hz_to_bark(f: f64) -> f64 {
    13.0 * (0.00076 * f).atan() + 3.5 * (f / 7500.0).powi(2).atan()
}

fn bark_slope(f: f64) -> f64 {
    let a = 0.00076 * f;
    let r = (f / 7500.0).powi(2);
    13.0 * 0.00076 / (1.0 + a * a) + 3.5 * (2.0 * f / (7500.0 * 7500.0)) / (1.0 + r * r)
}

/// Inverts [`hz_to_bark`]. The closed form `1960*(b+0.53)/(26.28-b)` seeds a
/// bracketed Newton solve so the round trip is exact to float precision.
fn bark_to_hz(bark: f64) -> f64 {
    if !(bark > 0.0) {
        return 0.0;
    }

    let mut lo = 0.0;
    let mut hi = BARK_MAX_HZ;
    if bark >= hz_to_bark(hi) {
        return hi;
    }

    let mut f = (1960.0 * (bark + 0.53) / (26.28 - bark)).clamp(lo, hi);
    for _ in 0..BARK_SOLVER_STEPS {
        let err = hz_to_bark(f) - bark;
        if err == 0.0 {
            break;
        }
        if err > 0.0 {
            hi = f;
        } else {
            lo = f;
        }

        let mut next = f - err / bark_slope(f);
        if !(next > lo && next < hi) {
            next = 0.5 * (lo + hi);
        }
        if (next - f).abs() <= 1e-12 * f.max(1.0) {
            f = next;
            break;
        }
        f = next;
    }

    f
}

/// Nearest-bin layout for one (scale, sample rate, size) combination.
#[derive(Debug)]
struct BinMap {
    scale: ScaleType,
    sample_rate: u32,
    out_bins: usize,
    bins: Vec<usize>,
}

/// Turns a complex spectrum into `size/2 + 1` normalized magnitudes laid out
/// on a [`ScaleType`] axis.
///
/// Keeps the bin map of the last non-linear layout it converted, so a worker
/// that owns one converter only rebuilds it when the layout changes.
#[derive(Debug, Default)]
pub struct ScaleConverter {
    bin_map: Option<BinMap>,
}

impl ScaleConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_bins(size: usize) -> usize {
        size / 2 + 1
    }

    pub fn convert(
        &mut self,
        raw: &RawSpectrumResult,
        scale: ScaleType,
        gain: GainSnapshot,
    ) -> Result<Vec<f32>> {
        let size = raw.bins.len();
        if size < 2 {
            return Err(SpectrumError::transform(format!(
                "spectrum has {} bins, need at least 2",
                size
            )));
        }
        if raw.sample_rate == 0 {
            return Err(SpectrumError::transform("spectrum has a zero sample rate"));
        }

        let out_bins = Self::output_bins(size);
        let last = out_bins - 1;
        let power: Vec<f32> = raw.bins[..out_bins]
            .iter()
            .map(|c| c.re * c.re + c.im * c.im)
            .collect();

        let magnitudes: Vec<f32> = match scale {
            ScaleType::Linear => (0..out_bins)
                .into_par_iter()
                .map(|i| {
                    let averaged = if i == 0 || i == last {
                        power[i]
                    } else {
                        (power[i - 1] + power[i] + power[i + 1]) / 3.0
                    };
                    normalize(averaged, &gain)
                })
                .collect(),
            _ => self
                .bins_for(scale, raw.sample_rate, out_bins)
                .par_iter()
                .map(|&bin| normalize(power[bin], &gain))
                .collect(),
        };

        Ok(magnitudes)
    }

    fn bins_for(&mut self, scale: ScaleType, sample_rate: u32, out_bins: usize) -> &[usize] {
        let stale = !matches!(
            &self.bin_map,
            Some(map) if map.scale == scale
                && map.sample_rate == sample_rate
                && map.out_bins == out_bins
        );
        if stale {
            log::debug!(
                "Building {} bin map for {} Hz, {} bins",
                scale,
                sample_rate,
                out_bins
            );
            self.bin_map = Some(BinMap {
                scale,
                sample_rate,
                out_bins,
                bins: mapped_bins(scale, sample_rate as f32 / 2.0, out_bins),
            });
        }
        match &self.bin_map {
            Some(map) => &map.bins,
            None => &[],
        }
    }

    /// Centre frequency in Hz of every output index for `scale`.
    pub fn output_frequencies(scale: ScaleType, size: usize, sample_rate: u32) -> Vec<f32> {
        let out_bins = Self::output_bins(size);
        let nyquist = sample_rate as f32 / 2.0;
        let last = out_bins.saturating_sub(1).max(1) as f32;

        match scale {
            ScaleType::Linear => (0..out_bins).map(|i| i as f32 / last * nyquist).collect(),
            _ => {
                let (min_domain, step) = domain_axis(scale, nyquist, out_bins);
                (0..out_bins)
                    .map(|i| scale.inverse(min_domain + i as f32 * step))
                    .collect()
            }
        }
    }
}

fn domain_axis(scale: ScaleType, nyquist: f32, out_bins: usize) -> (f32, f32) {
    let min_domain = scale.forward(LOWEST_FREQUENCY_HZ);
    let max_domain = scale.forward(nyquist);
    let step = (max_domain - min_domain) / out_bins.saturating_sub(1).max(1) as f32;
    (min_domain, step)
}

/// Nearest linear bin for every output index of a non-linear scale.
fn mapped_bins(scale: ScaleType, nyquist: f32, out_bins: usize) -> Vec<usize> {
    let last = (out_bins - 1) as f32;
    let (min_domain, step) = domain_axis(scale, nyquist, out_bins);

    (0..out_bins)
        .map(|i| {
            let freq = scale.inverse(min_domain + i as f32 * step);
            // NaN saturates to bin 0
            (freq / nyquist * last).round().clamp(0.0, last) as usize
        })
        .collect()
}

fn normalize(power: f32, gain: &GainSnapshot) -> f32 {
    if !(power > 0.0) || !power.is_finite() {
        return 0.0;
    }

    let db = 10.0 * power.log10();
    let norm = ((db - gain.min_db) / gain.db_range).clamp(0.0, 1.0);
    if norm < SILENCE_THRESHOLD {
        0.0
    } else {
        norm.powf(gain.amplification)
    }
}
