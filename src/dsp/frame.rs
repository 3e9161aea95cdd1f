use rustfft::num_complex::Complex32;

use super::window::{WindowBank, WindowType};

/// Folds arbitrary-length sample chunks into fixed-size windowed frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: Vec<Complex32>,
    filled: usize,
    window: WindowType,
}

impl FrameAccumulator {
    pub fn new(size: usize, window: WindowType) -> Self {
        Self {
            buffer: vec![Complex32::new(0.0, 0.0); size],
            filled: 0,
            window,
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Samples held towards the next frame.
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn window(&self) -> WindowType {
        self.window
    }

    /// Switches the taper and discards any partial frame.
    pub fn set_window(&mut self, window: WindowType) {
        self.window = window;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.buffer.fill(Complex32::new(0.0, 0.0));
        self.filled = 0;
    }

    /// Windows `samples` into the buffer, handing every completed frame to
    /// `on_frame`. Returns the number of frames completed.
    pub fn push<F>(&mut self, samples: &[f32], bank: &WindowBank, mut on_frame: F) -> usize
    where
        F: FnMut(Vec<Complex32>),
    {
        let size = self.buffer.len();
        let coeffs = bank.coefficients(self.window);
        let mut rest = samples;
        let mut frames = 0;

        while !rest.is_empty() {
            let take = (size - self.filled).min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            let range = self.filled..self.filled + take;

            for ((slot, &sample), &coeff) in self.buffer[range.clone()]
                .iter_mut()
                .zip(chunk)
                .zip(&coeffs[range])
            {
                *slot = Complex32::new(sample * coeff, 0.0);
            }

            self.filled += take;
            rest = tail;

            if self.filled == size {
                on_frame(self.buffer.clone());
                self.reset();
                frames += 1;
            }
        }

        frames
    }
}
