use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::trig::TrigTable;
use crate::error::SpectrumError;

/// Shape parameter used for the Kaiser window.
pub const KAISER_BETA: f64 = 5.0;

const BESSEL_EPSILON: f64 = 1e-10;
const BESSEL_MAX_TERMS: usize = 500;

/// Taper applied to every frame before transforming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    Kaiser,
}

impl WindowType {
    pub const ALL: [WindowType; 5] = [
        WindowType::Hann,
        WindowType::Hamming,
        WindowType::Blackman,
        WindowType::Bartlett,
        WindowType::Kaiser,
    ];

    /// Position of this window in [`WindowType::ALL`].
    pub fn index(self) -> usize {
        match self {
            WindowType::Hann => 0,
            WindowType::Hamming => 1,
            WindowType::Blackman => 2,
            WindowType::Bartlett => 3,
            WindowType::Kaiser => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            WindowType::Hann => "hann",
            WindowType::Hamming => "hamming",
            WindowType::Blackman => "blackman",
            WindowType::Bartlett => "bartlett",
            WindowType::Kaiser => "kaiser",
        }
    }

    fn generate(self, trig: &TrigTable) -> Vec<f32> {
        let size = trig.size();
        let denom = size.saturating_sub(1).max(1) as f64;
        let cos = trig.cos();

        match self {
            WindowType::Hann => cos.iter().map(|&c| 0.5 * (1.0 - c)).collect(),
            WindowType::Hamming => cos.iter().map(|&c| 0.54 - 0.46 * c).collect(),
            WindowType::Blackman => cos
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    // cos(2*angle) is not in the table
                    let angle = 2.0 * std::f64::consts::PI * i as f64 / denom;
                    (0.42 - 0.5 * c as f64 + 0.08 * (2.0 * angle).cos()) as f32
                })
                .collect(),
            WindowType::Bartlett => (0..size)
                .map(|i| (1.0 - (2.0 * i as f64 / denom - 1.0).abs()) as f32)
                .collect(),
            WindowType::Kaiser => {
                let norm = bessel_i0(KAISER_BETA);
                (0..size)
                    .map(|i| {
                        let ratio = 2.0 * i as f64 / denom - 1.0;
                        let arg = KAISER_BETA * (1.0 - ratio * ratio).max(0.0).sqrt();
                        (bessel_i0(arg) / norm) as f32
                    })
                    .collect()
            }
        }
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowType {
    type Err = SpectrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Ok(WindowType::Hann),
            "hamming" => Ok(WindowType::Hamming),
            "blackman" => Ok(WindowType::Blackman),
            "bartlett" | "triangular" => Ok(WindowType::Bartlett),
            "kaiser" => Ok(WindowType::Kaiser),
            other => Err(SpectrumError::config(format!("unsupported window type '{}'", other))),
        }
    }
}

/// Modified Bessel function of the first kind, order zero.
///
/// Power series `sum (x/2)^2k / (k!)^2`, stopped once a term drops below a
/// fixed epsilon. The term cap keeps non-finite input from looping forever.
pub fn bessel_i0(x: f64) -> f64 {
    let quarter_sq = (x / 2.0) * (x / 2.0);
    let mut sum = 1.0;
    let mut term = 1.0;

    for k in 1..=BESSEL_MAX_TERMS {
        let k = k as f64;
        term *= quarter_sq / (k * k);
        if !(term >= BESSEL_EPSILON) {
            break;
        }
        sum += term;
    }

    sum
}

/// One precomputed coefficient array per [`WindowType`], built once.
#[derive(Debug)]
pub struct WindowBank {
    size: usize,
    coeffs: Vec<Vec<f32>>,
}

impl WindowBank {
    pub fn new(size: usize) -> Self {
        let trig = TrigTable::generate(size);
        let coeffs = WindowType::ALL.iter().map(|w| w.generate(&trig)).collect();
        Self { size, coeffs }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn coefficients(&self, window: WindowType) -> &[f32] {
        &self.coeffs[window.index()]
    }
}
