use clap::Parser;
use std::path::PathBuf;

use spectra::{ScaleType, WindowType};

#[derive(Parser, Debug)]
#[command(name = "spectra", about = "Streams an audio file through the real-time spectrum analyzer")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: PathBuf,

    /// Settings file (defaults to ./spectra.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Window function: hann, hamming, blackman, bartlett, kaiser
    #[arg(short, long, default_value_t = WindowType::Hann)]
    pub window: WindowType,

    /// Frequency scale: linear, log, mel, bark, erb
    #[arg(short, long, default_value_t = ScaleType::Logarithmic)]
    pub scale: ScaleType,

    /// Transform size (power of two)
    #[arg(long, default_value_t = 2048)]
    pub fft_size: usize,

    /// Capacity of each internal queue
    #[arg(long, default_value_t = 10)]
    pub queue_capacity: usize,

    /// Level mapped to the bottom of the range
    #[arg(long, default_value_t = -90.0, allow_negative_numbers = true)]
    pub min_db: f32,

    /// Level mapped to the top of the range
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub max_db: f32,

    /// Exponent applied to normalized levels
    #[arg(long, default_value_t = 1.0)]
    pub amplification: f32,

    /// Columns in the text bar graph
    #[arg(long, default_value_t = 64)]
    pub bars: usize,

    /// Feed samples at playback speed instead of as fast as possible
    #[arg(long)]
    pub realtime: bool,

    /// Print one JSON object per spectrum instead of the bar graph
    #[arg(long)]
    pub json: bool,
}
