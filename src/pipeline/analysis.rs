use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::queue::{DropOldestQueue, Pop, PushOutcome};
use super::transform::{SpectrumSink, StageCounters, TransformStage};
use super::CancelToken;
use crate::config::PipelineConfig;
use crate::dsp::fft::{FftKernel, RawSpectrumResult, RustFftKernel};
use crate::dsp::gain::GainParameters;
use crate::dsp::scale::{ScaleConverter, ScaleType};
use crate::dsp::window::WindowType;
use crate::error::{Result, SpectrumError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// One published spectrum. Zero-length magnitudes mean "nothing yet".
#[derive(Debug, Clone)]
pub struct SpectralData {
    pub magnitudes: Vec<f32>,
    pub timestamp: Instant,
    pub sample_rate: u32,
    pub scale: ScaleType,
}

impl SpectralData {
    pub fn empty(scale: ScaleType) -> Self {
        Self {
            magnitudes: Vec::new(),
            timestamp: Instant::now(),
            sample_rate: 0,
            scale,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }
}

/// Running totals for one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub chunks_accepted: u64,
    /// Evicted on overflow, rejected on lock contention, or stale after a reconfiguration.
    pub chunks_dropped: u64,
    pub frames_transformed: u64,
    pub frames_skipped: u64,
    pub transform_faults: u64,
    pub spectra_published: u64,
    /// Evicted on overflow or computed under a superseded configuration.
    pub results_dropped: u64,
}

struct Chunk {
    samples: Vec<f32>,
    sample_rate: u32,
    epoch: u64,
}

/// Sample buffers returned by the transform worker for reuse by `submit`.
struct ChunkPool {
    spare_tx: Sender<Vec<f32>>,
    spare_rx: Receiver<Vec<f32>>,
}

impl ChunkPool {
    fn new(buffers: usize, buffer_len: usize) -> Self {
        let (spare_tx, spare_rx) = crossbeam_channel::bounded(buffers);
        for _ in 0..buffers {
            let _ = spare_tx.try_send(Vec::with_capacity(buffer_len));
        }
        Self { spare_tx, spare_rx }
    }

    /// Copies `samples` into a spare buffer, allocating only when none is left.
    fn fill(&self, samples: &[f32]) -> Vec<f32> {
        let mut buffer = self.spare_rx.try_recv().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(samples);
        buffer
    }

    fn recycle(&self, buffer: Vec<f32>) {
        let _ = self.spare_tx.try_send(buffer);
    }
}

struct TaggedSpectrum {
    epoch: u64,
    raw: RawSpectrumResult,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    window: WindowType,
    scale: ScaleType,
}

#[derive(Default)]
struct Counters {
    chunks_accepted: AtomicU64,
    stale_chunks: AtomicU64,
    spectra_published: AtomicU64,
    stale_results: AtomicU64,
    conversion_faults: AtomicU64,
}

struct Shared {
    settings: Mutex<Settings>,
    epoch: AtomicU64,
    gain: GainParameters,
    current: Mutex<Arc<SpectralData>>,
    subscribers: Mutex<Vec<Sender<Arc<SpectralData>>>>,
    cancel: CancelToken,
    disposed: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn settings(&self) -> Settings {
        *self.settings.lock()
    }

    /// Swaps in `data` unless the configuration moved past `epoch`.
    fn publish(&self, data: SpectralData, epoch: u64) -> bool {
        let data = Arc::new(data);
        let mut current = self.current.lock();
        if self.epoch.load(Ordering::Acquire) != epoch || self.cancel.is_cancelled() {
            return false;
        }
        *current = Arc::clone(&data);
        // notify under the lock so an empty reset can never be overtaken
        self.notify(&data);
        true
    }

    fn notify(&self, data: &Arc<SpectralData>) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(Arc::clone(data)) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// Applies `update` to the settings, bumps the epoch and publishes an empty snapshot.
    fn reconfigure<F: FnOnce(&mut Settings)>(&self, update: F) {
        let mut settings = self.settings.lock();
        update(&mut settings);
        let scale = settings.scale;

        let empty = Arc::new(SpectralData::empty(scale));
        let mut current = self.current.lock();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        *current = Arc::clone(&empty);
        self.notify(&empty);

        log::debug!(
            "Reconfigured to window={} scale={} (epoch {})",
            settings.window,
            scale,
            epoch
        );
    }
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Real-time spectrum analyzer: samples in, normalized spectra out.
///
/// `submit` never blocks. Frames are accumulated and windowed on one worker,
/// transformed on a dedicated FFT pool and converted on a second worker. The
/// latest result is available from [`AnalysisPipeline::get_current`] and is
/// pushed to every [`AnalysisPipeline::subscribe`] receiver.
pub struct AnalysisPipeline {
    shared: Arc<Shared>,
    samples: Arc<DropOldestQueue<Chunk>>,
    chunks: Arc<ChunkPool>,
    spectra: Arc<DropOldestQueue<TaggedSpectrum>>,
    stage_counters: Arc<StageCounters>,
    workers: Mutex<Vec<Worker>>,
    transform_size: usize,
    queue_capacity: usize,
}

impl AnalysisPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let kernel = Arc::new(RustFftKernel::new(config.transform_size));
        Self::with_kernel(config, kernel)
    }

    pub fn with_kernel(config: PipelineConfig, kernel: Arc<dyn FftKernel>) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            settings: Mutex::new(Settings {
                window: config.window,
                scale: config.scale,
            }),
            epoch: AtomicU64::new(0),
            gain: GainParameters::new(config.min_db, config.max_db, config.amplification)?,
            current: Mutex::new(Arc::new(SpectralData::empty(config.scale))),
            subscribers: Mutex::new(Vec::new()),
            cancel: CancelToken::new(),
            disposed: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let samples = Arc::new(DropOldestQueue::new(config.queue_capacity));
        // one per queue slot plus the chunk being transformed and the one being filled
        let chunks = Arc::new(ChunkPool::new(
            config.queue_capacity + 2,
            config.transform_size,
        ));
        let spectra = Arc::new(DropOldestQueue::new(config.queue_capacity));
        let stage_counters = Arc::new(StageCounters::default());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|i| format!("spectra-fft-{}", i))
            .build()
            .map_err(|e| SpectrumError::Worker(e.to_string()))?;

        let sink: SpectrumSink = {
            let spectra = Arc::clone(&spectra);
            Arc::new(move |epoch: u64, raw: RawSpectrumResult| {
                spectra.push(TaggedSpectrum { epoch, raw });
            })
        };

        let stage = TransformStage::new(config.transform_size, config.window, kernel, sink)?
            .with_pool(Arc::new(pool), config.queue_capacity)
            .with_cancel(shared.cancel.clone())
            .with_counters(Arc::clone(&stage_counters));

        let mut workers = Vec::with_capacity(2);
        workers.push(spawn_worker("spectra-transform", {
            let shared = Arc::clone(&shared);
            let samples = Arc::clone(&samples);
            let chunks = Arc::clone(&chunks);
            move || transform_loop(stage, &samples, &chunks, &shared)
        })?);

        let conversion = spawn_worker("spectra-convert", {
            let shared = Arc::clone(&shared);
            let spectra = Arc::clone(&spectra);
            move || conversion_loop(&spectra, &shared)
        });
        match conversion {
            Ok(worker) => workers.push(worker),
            Err(err) => {
                shared.cancel.cancel();
                samples.close();
                return Err(err);
            }
        }

        log::info!(
            "Spectrum pipeline started: size={} window={} scale={} queue={}",
            config.transform_size,
            config.window,
            config.scale,
            config.queue_capacity
        );

        Ok(Self {
            shared,
            samples,
            chunks,
            spectra,
            stage_counters,
            workers: Mutex::new(workers),
            transform_size: config.transform_size,
            queue_capacity: config.queue_capacity,
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            Err(SpectrumError::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    pub fn transform_size(&self) -> usize {
        self.transform_size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn output_bins(&self) -> usize {
        ScaleConverter::output_bins(self.transform_size)
    }

    /// Hands a chunk of mono samples to the pipeline without blocking.
    ///
    /// The chunk is dropped silently when the queue lock is busy; when the
    /// queue is full its oldest chunk is evicted instead.
    pub fn submit(&self, samples: &[f32], sample_rate: u32) -> Result<()> {
        self.ensure_active()?;
        if sample_rate == 0 {
            return Err(SpectrumError::config("sample rate must be positive"));
        }
        if samples.is_empty() {
            return Ok(());
        }

        let chunk = Chunk {
            samples: self.chunks.fill(samples),
            sample_rate,
            epoch: self.shared.epoch.load(Ordering::Acquire),
        };
        match self.samples.try_push(chunk) {
            PushOutcome::Queued | PushOutcome::Evicted => {
                self.shared
                    .counters
                    .chunks_accepted
                    .fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Contended | PushOutcome::Closed => {}
        }
        Ok(())
    }

    /// Latest published spectrum, or an empty one.
    pub fn get_current(&self) -> Result<Arc<SpectralData>> {
        self.ensure_active()?;
        Ok(Arc::clone(&self.shared.current.lock()))
    }

    /// Receiver of every published spectrum, including empty resets.
    ///
    /// A receiver that falls `queue_capacity` notifications behind misses the
    /// newer ones until it catches up.
    pub fn subscribe(&self) -> Result<Receiver<Arc<SpectralData>>> {
        self.ensure_active()?;
        let (tx, rx) = crossbeam_channel::bounded(self.queue_capacity);
        self.shared.subscribers.lock().push(tx);
        Ok(rx)
    }

    pub fn window_type(&self) -> WindowType {
        self.shared.settings().window
    }

    pub fn scale_type(&self) -> ScaleType {
        self.shared.settings().scale
    }

    /// Switches the taper. Any partial frame is discarded and an empty
    /// spectrum is published before this returns.
    pub fn set_window_type(&self, window: WindowType) -> Result<()> {
        self.ensure_active()?;
        self.shared.reconfigure(|s| s.window = window);
        Ok(())
    }

    /// Switches the frequency scale. Any partial frame is discarded and an
    /// empty spectrum is published before this returns.
    pub fn set_scale_type(&self, scale: ScaleType) -> Result<()> {
        self.ensure_active()?;
        self.shared.reconfigure(|s| s.scale = scale);
        Ok(())
    }

    /// Live gain settings; changes apply from the next conversion.
    pub fn gain(&self) -> &GainParameters {
        &self.shared.gain
    }

    pub fn set_db_range(&self, min_db: f32, max_db: f32) -> Result<()> {
        self.ensure_active()?;
        self.shared.gain.set_range(min_db, max_db)
    }

    pub fn set_amplification(&self, amplification: f32) -> Result<()> {
        self.ensure_active()?;
        self.shared.gain.set_amplification(amplification)
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.shared.counters;
        let s = &self.stage_counters;
        PipelineStats {
            chunks_accepted: c.chunks_accepted.load(Ordering::Relaxed),
            chunks_dropped: self.samples.dropped() + c.stale_chunks.load(Ordering::Relaxed),
            frames_transformed: s.frames_transformed.load(Ordering::Relaxed),
            frames_skipped: s.frames_skipped.load(Ordering::Relaxed),
            transform_faults: s.transform_faults.load(Ordering::Relaxed)
                + c.conversion_faults.load(Ordering::Relaxed),
            spectra_published: c.spectra_published.load(Ordering::Relaxed),
            results_dropped: self.spectra.dropped() + c.stale_results.load(Ordering::Relaxed),
        }
    }

    /// Stops all background work. Later calls return [`SpectrumError::Disposed`].
    ///
    /// Waits up to 500ms for the workers; a worker that does not exit in time
    /// is logged and left detached.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.cancel.cancel();
        self.samples.close();
        self.spectra.close();
        self.shared.subscribers.lock().clear();

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        for worker in self.workers.lock().drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match worker.done.recv_timeout(remaining) {
                Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                    if worker.handle.join().is_err() {
                        log::warn!("Worker {} panicked", worker.name);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Worker {} did not stop within {:?}; detaching",
                        worker.name,
                        SHUTDOWN_TIMEOUT
                    );
                }
            }
        }

        let stats = self.stats();
        log::info!(
            "Spectrum pipeline disposed: {} frames, {} spectra, {} chunks dropped",
            stats.frames_transformed,
            stats.spectra_published,
            stats.chunks_dropped
        );
    }
}

impl Drop for AnalysisPipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_worker<F>(name: &'static str, body: F) -> Result<Worker>
where
    F: FnOnce() + Send + 'static,
{
    let (done_tx, done) = crossbeam_channel::bounded::<()>(1);
    let handle = thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            // disconnects `done` on exit, even when unwinding
            let _done = done_tx;
            body();
        })
        .map_err(|e| SpectrumError::Worker(format!("{}: {}", name, e)))?;

    Ok(Worker { name, handle, done })
}

fn transform_loop(
    mut stage: TransformStage,
    samples: &DropOldestQueue<Chunk>,
    chunks: &ChunkPool,
    shared: &Shared,
) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let chunk = match samples.pop_wait_timeout(POLL_INTERVAL) {
            Pop::Item(chunk) => chunk,
            Pop::Timeout => continue,
            Pop::Closed => break,
        };

        let epoch = shared.epoch.load(Ordering::Acquire);
        if chunk.epoch < epoch {
            // submitted before the last reconfiguration
            shared.counters.stale_chunks.fetch_add(1, Ordering::Relaxed);
            chunks.recycle(chunk.samples);
            continue;
        }
        if stage.epoch() != epoch {
            stage.reconfigure(shared.settings().window, epoch);
        }

        if let Err(err) = stage.submit(&chunk.samples, chunk.sample_rate) {
            log::warn!("Rejected sample chunk: {}", err);
        }
        chunks.recycle(chunk.samples);
    }

    log::debug!("Transform worker exiting");
}

fn conversion_loop(spectra: &DropOldestQueue<TaggedSpectrum>, shared: &Shared) {
    let mut converter = ScaleConverter::new();
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let tagged = match spectra.pop_wait_timeout(POLL_INTERVAL) {
            Pop::Item(tagged) => tagged,
            Pop::Timeout => continue,
            Pop::Closed => break,
        };

        let settings = shared.settings();
        if tagged.epoch != shared.epoch.load(Ordering::Acquire) {
            shared.counters.stale_results.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let gain = shared.gain.snapshot();
        let magnitudes = match converter.convert(&tagged.raw, settings.scale, gain) {
            Ok(magnitudes) => magnitudes,
            Err(err) => {
                shared.counters.conversion_faults.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropping spectrum: {}", err);
                continue;
            }
        };

        if shared.cancel.is_cancelled() {
            break;
        }

        let data = SpectralData {
            magnitudes,
            timestamp: Instant::now(),
            sample_rate: tagged.raw.sample_rate,
            scale: settings.scale,
        };
        if shared.publish(data, tagged.epoch) {
            shared.counters.spectra_published.fetch_add(1, Ordering::Relaxed);
        } else {
            shared.counters.stale_results.fetch_add(1, Ordering::Relaxed);
        }
    }

    log::debug!("Conversion worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn sine(len: usize, freq: f32, sample_rate: u32) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * std::f32::consts::PI * freq * n as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn chunk_buffers_are_reused() {
        let chunks = ChunkPool::new(1, 64);
        let first = chunks.fill(&[0.5; 16]);
        let address = first.as_ptr();
        chunks.recycle(first);

        let second = chunks.fill(&[0.25; 8]);
        assert_eq!(second.as_ptr(), address);
        assert_eq!(second, vec![0.25; 8]);
    }

    #[test]
    fn rejects_invalid_transform_size() {
        let config = PipelineConfig::default().with_transform_size(1000);
        assert!(matches!(
            AnalysisPipeline::new(config),
            Err(SpectrumError::Configuration(_))
        ));
        assert!(AnalysisPipeline::new(PipelineConfig::default().with_transform_size(1024)).is_ok());
    }

    #[test]
    fn starts_with_empty_snapshot() {
        let pipeline = AnalysisPipeline::new(PipelineConfig::default()).unwrap();
        assert!(pipeline.get_current().unwrap().is_empty());
        assert_eq!(pipeline.output_bins(), 1025);
    }

    #[test]
    fn publishes_normalized_spectrum() {
        let config = PipelineConfig::default()
            .with_transform_size(512)
            .with_scale(ScaleType::Mel)
            .with_gain(-60.0, 60.0, 1.0);
        let pipeline = AnalysisPipeline::new(config).unwrap();
        let rx = pipeline.subscribe().unwrap();

        let signal = sine(4096, 1_000.0, 48_000);
        for chunk in signal.chunks(300) {
            pipeline.submit(chunk, 48_000).unwrap();
            thread::sleep(Duration::from_millis(1));
        }

        let data = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(data.magnitudes.len(), 257);
        assert_eq!(data.sample_rate, 48_000);
        assert!(data.magnitudes.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(data.magnitudes.iter().any(|&v| v > 0.0));
        assert!(wait_for(|| !pipeline.get_current().unwrap().is_empty()));
    }

    #[test]
    fn scale_change_publishes_empty_snapshot() {
        let config = PipelineConfig::default().with_transform_size(256);
        let pipeline = AnalysisPipeline::new(config).unwrap();

        let signal = sine(2048, 440.0, 44_100);
        for chunk in signal.chunks(256) {
            pipeline.submit(chunk, 44_100).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(wait_for(|| !pipeline.get_current().unwrap().is_empty()));

        pipeline.set_scale_type(ScaleType::Bark).unwrap();
        let current = pipeline.get_current().unwrap();
        assert!(current.is_empty());
        assert_eq!(current.scale, ScaleType::Bark);
        assert_eq!(pipeline.scale_type(), ScaleType::Bark);
    }

    #[test]
    fn window_change_notifies_subscribers_with_empty_snapshot() {
        let pipeline = AnalysisPipeline::new(PipelineConfig::default()).unwrap();
        let rx = pipeline.subscribe().unwrap();

        pipeline.set_window_type(WindowType::Blackman).unwrap();

        let data = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(data.is_empty());
        assert_eq!(pipeline.window_type(), WindowType::Blackman);
    }

    #[test]
    fn submit_validates_input() {
        let pipeline = AnalysisPipeline::new(PipelineConfig::default()).unwrap();
        assert!(matches!(
            pipeline.submit(&[0.0; 16], 0),
            Err(SpectrumError::Configuration(_))
        ));
        assert!(pipeline.submit(&[], 48_000).is_ok());
        assert_eq!(pipeline.stats().chunks_accepted, 0);
    }

    #[test]
    fn gain_changes_are_validated() {
        let pipeline = AnalysisPipeline::new(PipelineConfig::default()).unwrap();
        assert!(pipeline.set_db_range(-40.0, -50.0).is_err());
        assert!(pipeline.set_db_range(-40.0, -10.0).is_ok());
        assert!(pipeline.set_amplification(-1.0).is_err());
        assert_eq!(pipeline.gain().snapshot().db_range, 30.0);
    }

    #[test]
    fn disposed_pipeline_rejects_calls() {
        let pipeline = AnalysisPipeline::new(PipelineConfig::default()).unwrap();
        let rx = pipeline.subscribe().unwrap();
        pipeline.dispose();

        assert!(pipeline.is_disposed());
        assert_eq!(pipeline.submit(&[0.0; 8], 48_000), Err(SpectrumError::Disposed));
        assert!(matches!(pipeline.get_current(), Err(SpectrumError::Disposed)));
        assert!(matches!(
            pipeline.set_scale_type(ScaleType::Linear),
            Err(SpectrumError::Disposed)
        ));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        // second dispose is a no-op
        pipeline.dispose();
    }
}
