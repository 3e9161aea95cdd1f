use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::error::{Result, SpectrumError};

/// Complex bins of one transformed frame.
#[derive(Debug, Clone)]
pub struct RawSpectrumResult {
    pub bins: Vec<Complex32>,
    pub sample_rate: u32,
}

/// In-place forward complex transform of a fixed length.
pub trait FftKernel: Send + Sync {
    fn len(&self) -> usize;

    fn process(&self, buffer: &mut [Complex32]) -> Result<()>;
}

/// Forward transform backed by a `rustfft` plan.
pub struct RustFftKernel {
    fft: Arc<dyn Fft<f32>>,
}

impl RustFftKernel {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(size),
        }
    }
}

impl FftKernel for RustFftKernel {
    fn len(&self) -> usize {
        self.fft.len()
    }

    fn process(&self, buffer: &mut [Complex32]) -> Result<()> {
        if buffer.len() != self.fft.len() {
            return Err(SpectrumError::transform(format!(
                "frame has {} samples, kernel expects {}",
                buffer.len(),
                self.fft.len()
            )));
        }
        self.fft.process(buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_has_flat_spectrum() {
        let kernel = RustFftKernel::new(8);
        let mut buffer = vec![Complex32::new(0.0, 0.0); 8];
        buffer[0] = Complex32::new(1.0, 0.0);
        kernel.process(&mut buffer).unwrap();
        for bin in &buffer {
            assert!((bin.re - 1.0).abs() < 1e-6);
            assert!(bin.im.abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_wrong_length() {
        let kernel = RustFftKernel::new(16);
        let mut buffer = vec![Complex32::new(0.0, 0.0); 8];
        assert!(matches!(
            kernel.process(&mut buffer),
            Err(SpectrumError::Transform(_))
        ));
    }
}
