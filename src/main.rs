mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cli::Cli;
use spectra::audio::decode::AudioStream;
use spectra::config::{self, DEFAULT_QUEUE_CAPACITY, DEFAULT_TRANSFORM_SIZE};
use spectra::dsp::gain::{DEFAULT_AMPLIFICATION, DEFAULT_MAX_DB, DEFAULT_MIN_DB};
use spectra::{AnalysisPipeline, PipelineConfig, ScaleType, SpectralData, WindowType};

/// Callback sizes cycled through to mimic an audio device.
const CALLBACK_SIZES: [usize; 5] = [480, 441, 1024, 333, 512];
const BAR_LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const DRAIN_WAIT: Duration = Duration::from_millis(250);

#[derive(Serialize)]
struct SpectrumLine<'a> {
    elapsed_ms: u128,
    sample_rate: u32,
    scale: ScaleType,
    magnitudes: &'a [f32],
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect spectra.toml / platform config
    let config_path = cli.config.clone().or_else(|| {
        let local = std::path::PathBuf::from("spectra.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("spectra").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.window == WindowType::default() { cli.window = cfg.analysis.window; }
            if cli.scale == ScaleType::default() { cli.scale = cfg.analysis.scale; }
            if cli.fft_size == DEFAULT_TRANSFORM_SIZE { cli.fft_size = cfg.analysis.transform_size; }
            if cli.queue_capacity == DEFAULT_QUEUE_CAPACITY { cli.queue_capacity = cfg.analysis.queue_capacity; }
            if cli.min_db == DEFAULT_MIN_DB { cli.min_db = cfg.gain.min_db; }
            if cli.max_db == DEFAULT_MAX_DB { cli.max_db = cfg.gain.max_db; }
            if cli.amplification == DEFAULT_AMPLIFICATION { cli.amplification = cfg.gain.amplification; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    if !cli.input.exists() {
        anyhow::bail!("Input file not found: {}", cli.input.display());
    }
    if cli.bars == 0 {
        anyhow::bail!("--bars must be at least 1");
    }

    let pipeline_config = PipelineConfig::default()
        .with_transform_size(cli.fft_size)
        .with_queue_capacity(cli.queue_capacity)
        .with_window(cli.window)
        .with_scale(cli.scale)
        .with_gain(cli.min_db, cli.max_db, cli.amplification);

    let pipeline = AnalysisPipeline::new(pipeline_config).context("Invalid analysis settings")?;
    let mut stream = AudioStream::open(&cli.input)?;
    let sample_rate = stream.sample_rate();

    let pb = match stream.total_frames() {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:30.cyan/blue} {percent:>3}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    if cli.json {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let started = Instant::now();
    let consumer = {
        let rx = pipeline.subscribe()?;
        let pb = pb.clone();
        let json = cli.json;
        let bars = cli.bars;
        thread::Builder::new()
            .name("spectra-render".into())
            .spawn(move || {
                for data in rx {
                    if data.is_empty() {
                        continue;
                    }
                    if json {
                        print_json(&data, started);
                    } else {
                        pb.set_message(render_bars(&data, bars));
                    }
                }
            })
            .context("Failed to start render thread")?
    };

    log::info!(
        "Streaming {} through {} window, {} scale, {}-point FFT",
        cli.input.display(),
        cli.window,
        cli.scale,
        cli.fft_size
    );

    let mut fed: u64 = 0;
    let mut callback = 0;
    while let Some(block) = stream.next_block()? {
        let mut rest = block;
        while !rest.is_empty() {
            let take = CALLBACK_SIZES[callback % CALLBACK_SIZES.len()].min(rest.len());
            callback += 1;
            let (chunk, tail) = rest.split_at(take);
            pipeline.submit(chunk, sample_rate)?;
            rest = tail;
            fed += take as u64;

            if cli.realtime {
                let due = Duration::from_secs_f64(fed as f64 / sample_rate as f64);
                if let Some(wait) = due.checked_sub(started.elapsed()) {
                    thread::sleep(wait);
                }
            }
        }
        pb.set_position(fed);
    }

    thread::sleep(DRAIN_WAIT);
    let last = pipeline.get_current()?;
    let stats = pipeline.stats();
    pipeline.dispose();
    let _ = consumer.join();

    pb.finish_and_clear();
    if !cli.json && !last.is_empty() {
        println!("{}", render_bars(&last, cli.bars));
    }

    log::info!(
        "Done: {:.1}s of audio, {} chunks ({} dropped), {} frames, {} spectra ({} dropped), {} faults",
        fed as f64 / sample_rate as f64,
        stats.chunks_accepted,
        stats.chunks_dropped,
        stats.frames_transformed,
        stats.spectra_published,
        stats.results_dropped,
        stats.transform_faults
    );
    Ok(())
}

fn print_json(data: &Arc<SpectralData>, started: Instant) {
    let line = SpectrumLine {
        elapsed_ms: data.timestamp.saturating_duration_since(started).as_millis(),
        sample_rate: data.sample_rate,
        scale: data.scale,
        magnitudes: &data.magnitudes,
    };
    match serde_json::to_string(&line) {
        Ok(json) => println!("{}", json),
        Err(err) => log::warn!("Failed to serialize spectrum: {}", err),
    }
}

/// Collapses a spectrum into `columns` block characters, one per group maximum.
fn render_bars(data: &SpectralData, columns: usize) -> String {
    let bins = data.magnitudes.len();
    let top = (BAR_LEVELS.len() - 1) as f32;

    (0..columns)
        .map(|col| {
            let start = col * bins / columns;
            let end = ((col + 1) * bins / columns).max(start + 1).min(bins);
            let level = data.magnitudes[start.min(bins)..end]
                .iter()
                .copied()
                .fold(0.0f32, f32::max);
            BAR_LEVELS[(level * top).round() as usize]
        })
        .collect()
}
