pub mod fft;
pub mod frame;
pub mod gain;
pub mod scale;
pub mod trig;
pub mod window;

pub use fft::{FftKernel, RawSpectrumResult, RustFftKernel};
pub use frame::FrameAccumulator;
pub use gain::{GainParameters, GainSnapshot};
pub use scale::{ScaleConverter, ScaleType};
pub use trig::TrigTable;
pub use window::{bessel_i0, WindowBank, WindowType};
