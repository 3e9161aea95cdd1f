use rustfft::num_complex::Complex32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::queue::{DropOldestQueue, PushOutcome};
use super::CancelToken;
use crate::dsp::fft::{FftKernel, RawSpectrumResult};
use crate::dsp::frame::FrameAccumulator;
use crate::dsp::window::{WindowBank, WindowType};
use crate::error::{Result, SpectrumError};

/// Receives every transformed frame along with the epoch it was accumulated in.
pub type SpectrumSink = Arc<dyn Fn(u64, RawSpectrumResult) + Send + Sync>;

/// Frame counters shared with the owning pipeline.
#[derive(Debug, Default)]
pub struct StageCounters {
    pub frames_transformed: AtomicU64,
    pub transform_faults: AtomicU64,
    /// Pending frames evicted because the FFT pool fell behind.
    pub frames_skipped: AtomicU64,
}

pub fn validate_transform_size(size: usize) -> Result<()> {
    if size == 0 || !size.is_power_of_two() {
        return Err(SpectrumError::config(format!(
            "transform size must be a positive power of two, got {}",
            size
        )));
    }
    Ok(())
}

struct PendingFrame {
    frame: Vec<Complex32>,
    sample_rate: u32,
    epoch: u64,
}

/// Runs the kernel on one frame and hands the result to the sink.
#[derive(Clone)]
struct FrameTransformer {
    kernel: Arc<dyn FftKernel>,
    sink: SpectrumSink,
    cancel: CancelToken,
    counters: Arc<StageCounters>,
}

impl FrameTransformer {
    fn run(&self, pending: PendingFrame) {
        if self.cancel.is_cancelled() {
            return;
        }

        let PendingFrame {
            mut frame,
            sample_rate,
            epoch,
        } = pending;
        if let Err(err) = self.kernel.process(&mut frame) {
            self.counters.transform_faults.fetch_add(1, Ordering::Relaxed);
            log::warn!("Dropping frame: {}", err);
            return;
        }

        if self.cancel.is_cancelled() {
            return;
        }

        self.counters.frames_transformed.fetch_add(1, Ordering::Relaxed);
        (self.sink)(
            epoch,
            RawSpectrumResult {
                bins: frame,
                sample_rate,
            },
        );
    }
}

/// Frames waiting for the pool, drained by at most one job at a time.
struct PoolDispatch {
    pool: Arc<rayon::ThreadPool>,
    pending: Arc<DropOldestQueue<PendingFrame>>,
    draining: Arc<AtomicBool>,
}

impl PoolDispatch {
    fn send(&self, transformer: &FrameTransformer, pending: PendingFrame) {
        if self.pending.push(pending) == PushOutcome::Evicted {
            transformer
                .counters
                .frames_skipped
                .fetch_add(1, Ordering::Relaxed);
            log::debug!("FFT pool saturated, dropped oldest pending frame");
        }

        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        let transformer = transformer.clone();
        let pending = Arc::clone(&self.pending);
        let draining = Arc::clone(&self.draining);
        self.pool.spawn(move || loop {
            while let Some(frame) = pending.pop() {
                if transformer.cancel.is_cancelled() {
                    return;
                }
                transformer.run(frame);
            }

            draining.store(false, Ordering::SeqCst);
            // a frame queued between the last pop and the store above has no job yet
            if pending.is_empty() || draining.swap(true, Ordering::SeqCst) {
                return;
            }
        });
    }
}

enum Dispatch {
    Inline,
    Pool(PoolDispatch),
}

struct FrameDispatcher {
    transformer: FrameTransformer,
    dispatch: Dispatch,
}

impl FrameDispatcher {
    fn dispatch(&self, frame: Vec<Complex32>, sample_rate: u32, epoch: u64) {
        let pending = PendingFrame {
            frame,
            sample_rate,
            epoch,
        };
        match &self.dispatch {
            Dispatch::Inline => self.transformer.run(pending),
            Dispatch::Pool(pool) => pool.send(&self.transformer, pending),
        }
    }
}

/// Accumulates samples into windowed frames and transforms each full frame.
pub struct TransformStage {
    accumulator: FrameAccumulator,
    windows: WindowBank,
    dispatcher: FrameDispatcher,
    sample_rate: Option<u32>,
    epoch: u64,
}

impl TransformStage {
    pub fn new(
        size: usize,
        window: WindowType,
        kernel: Arc<dyn FftKernel>,
        sink: SpectrumSink,
    ) -> Result<Self> {
        validate_transform_size(size)?;
        if kernel.len() != size {
            return Err(SpectrumError::config(format!(
                "FFT kernel length {} does not match transform size {}",
                kernel.len(),
                size
            )));
        }

        Ok(Self {
            accumulator: FrameAccumulator::new(size, window),
            windows: WindowBank::new(size),
            dispatcher: FrameDispatcher {
                transformer: FrameTransformer {
                    kernel,
                    sink,
                    cancel: CancelToken::new(),
                    counters: Arc::new(StageCounters::default()),
                },
                dispatch: Dispatch::Inline,
            },
            sample_rate: None,
            epoch: 0,
        })
    }

    /// Runs transforms on `pool`. At most `max_pending` frames wait for it;
    /// past that the oldest waiting frame is evicted.
    pub fn with_pool(mut self, pool: Arc<rayon::ThreadPool>, max_pending: usize) -> Self {
        self.dispatcher.dispatch = Dispatch::Pool(PoolDispatch {
            pool,
            pending: Arc::new(DropOldestQueue::new(max_pending)),
            draining: Arc::new(AtomicBool::new(false)),
        });
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.dispatcher.transformer.cancel = cancel;
        self
    }

    pub fn with_counters(mut self, counters: Arc<StageCounters>) -> Self {
        self.dispatcher.transformer.counters = counters;
        self
    }

    pub fn size(&self) -> usize {
        self.accumulator.size()
    }

    pub fn filled(&self) -> usize {
        self.accumulator.filled()
    }

    pub fn window(&self) -> WindowType {
        self.accumulator.window()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn counters(&self) -> &Arc<StageCounters> {
        &self.dispatcher.transformer.counters
    }

    /// Switches the taper, discarding any partial frame.
    pub fn set_window(&mut self, window: WindowType) {
        if self.accumulator.filled() > 0 {
            log::debug!(
                "Discarding {} buffered samples on window change",
                self.accumulator.filled()
            );
        }
        self.accumulator.set_window(window);
    }

    /// Applies `window` and tags every later frame with `epoch`.
    pub fn reconfigure(&mut self, window: WindowType, epoch: u64) {
        self.set_window(window);
        self.epoch = epoch;
    }

    /// Feeds one chunk of mono samples. Returns how many frames it completed.
    pub fn submit(&mut self, samples: &[f32], sample_rate: u32) -> Result<usize> {
        if sample_rate == 0 {
            return Err(SpectrumError::config("sample rate must be positive"));
        }
        if samples.is_empty() {
            return Ok(0);
        }

        if self.sample_rate != Some(sample_rate) {
            if let Some(previous) = self.sample_rate {
                log::info!("Sample rate changed {} -> {} Hz", previous, sample_rate);
                self.accumulator.reset();
            }
            self.sample_rate = Some(sample_rate);
        }

        let epoch = self.epoch;
        let dispatcher = &self.dispatcher;
        let frames = self.accumulator.push(samples, &self.windows, |frame| {
            dispatcher.dispatch(frame, sample_rate, epoch)
        });

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::fft::RustFftKernel;
    use parking_lot::Mutex;

    fn collecting_stage(size: usize) -> (TransformStage, Arc<Mutex<Vec<(u64, RawSpectrumResult)>>>) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink: SpectrumSink = {
            let results = Arc::clone(&results);
            Arc::new(move |epoch: u64, raw: RawSpectrumResult| results.lock().push((epoch, raw)))
        };
        let stage = TransformStage::new(
            size,
            WindowType::Hann,
            Arc::new(RustFftKernel::new(size)),
            sink,
        )
        .unwrap();
        (stage, results)
    }

    struct FailingKernel(usize);

    impl FftKernel for FailingKernel {
        fn len(&self) -> usize {
            self.0
        }

        fn process(&self, _buffer: &mut [Complex32]) -> Result<()> {
            Err(SpectrumError::transform("kernel fault"))
        }
    }

    /// Records the centre sample of every frame and stalls on the first one
    /// until released.
    struct GatedKernel {
        size: usize,
        seen: Mutex<Vec<f32>>,
        stalled: AtomicBool,
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl FftKernel for GatedKernel {
        fn len(&self) -> usize {
            self.size
        }

        fn process(&self, buffer: &mut [Complex32]) -> Result<()> {
            self.seen.lock().push(buffer[self.size / 2].re);
            if !self.stalled.swap(true, Ordering::SeqCst) {
                let _ = self.entered.send(());
                let _ = self.release.recv_timeout(std::time::Duration::from_secs(5));
            }
            Ok(())
        }
    }

    fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn rejects_non_power_of_two_sizes() {
        assert!(validate_transform_size(1000).is_err());
        assert!(validate_transform_size(0).is_err());
        assert!(validate_transform_size(1024).is_ok());

        let sink: SpectrumSink = Arc::new(|_: u64, _: RawSpectrumResult| {});
        let result = TransformStage::new(
            1000,
            WindowType::Hann,
            Arc::new(RustFftKernel::new(1000)),
            sink,
        );
        assert!(matches!(result, Err(SpectrumError::Configuration(_))));
    }

    #[test]
    fn two_frames_and_a_remainder() {
        let size = 256;
        let (mut stage, results) = collecting_stage(size);

        let frames = stage.submit(&vec![0.25; 2 * size + 1], 48_000).unwrap();

        assert_eq!(frames, 2);
        assert_eq!(results.lock().len(), 2);
        assert_eq!(stage.filled(), 1);
        for (_, raw) in results.lock().iter() {
            assert_eq!(raw.bins.len(), size);
            assert_eq!(raw.sample_rate, 48_000);
        }
    }

    #[test]
    fn window_change_restarts_frame_count() {
        let size = 128;
        let (mut stage, results) = collecting_stage(size);

        stage.submit(&vec![0.5; 100], 44_100).unwrap();
        stage.set_window(WindowType::Kaiser);
        assert_eq!(stage.filled(), 0);

        stage.submit(&vec![0.5; size - 1], 44_100).unwrap();
        assert!(results.lock().is_empty());
        stage.submit(&[0.5], 44_100).unwrap();
        assert_eq!(results.lock().len(), 1);
    }

    #[test]
    fn zero_length_submit_is_noop() {
        let (mut stage, results) = collecting_stage(64);
        stage.submit(&[0.1; 10], 8_000).unwrap();
        assert_eq!(stage.submit(&[], 8_000).unwrap(), 0);
        assert_eq!(stage.filled(), 10);
        assert!(results.lock().is_empty());
    }

    #[test]
    fn zero_sample_rate_leaves_state_untouched() {
        let (mut stage, _) = collecting_stage(64);
        stage.submit(&[0.1; 10], 8_000).unwrap();
        assert!(matches!(
            stage.submit(&[0.1; 60], 0),
            Err(SpectrumError::Configuration(_))
        ));
        assert_eq!(stage.filled(), 10);
    }

    #[test]
    fn sample_rate_change_starts_new_frame() {
        let (mut stage, results) = collecting_stage(64);
        stage.submit(&[0.1; 40], 44_100).unwrap();
        stage.submit(&[0.1; 40], 48_000).unwrap();
        assert_eq!(stage.filled(), 40);
        assert!(results.lock().is_empty());
    }

    #[test]
    fn frames_carry_current_epoch() {
        let (mut stage, results) = collecting_stage(32);
        stage.submit(&[0.0; 32], 16_000).unwrap();
        stage.reconfigure(WindowType::Hamming, 7);
        stage.submit(&[0.0; 32], 16_000).unwrap();

        let epochs: Vec<u64> = results.lock().iter().map(|(e, _)| *e).collect();
        assert_eq!(epochs, vec![0, 7]);
        assert_eq!(stage.window(), WindowType::Hamming);
    }

    #[test]
    fn kernel_fault_drops_only_that_frame() {
        let results = Arc::new(Mutex::new(0usize));
        let sink: SpectrumSink = {
            let results = Arc::clone(&results);
            Arc::new(move |_: u64, _: RawSpectrumResult| *results.lock() += 1)
        };
        let mut stage =
            TransformStage::new(16, WindowType::Hann, Arc::new(FailingKernel(16)), sink).unwrap();

        assert_eq!(stage.submit(&[1.0; 48], 8_000).unwrap(), 3);
        assert_eq!(*results.lock(), 0);
        assert_eq!(stage.counters().transform_faults.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn cancelled_stage_emits_nothing() {
        let (stage, results) = collecting_stage(16);
        let cancel = CancelToken::new();
        let mut stage = stage.with_cancel(cancel.clone());
        cancel.cancel();
        stage.submit(&[1.0; 32], 8_000).unwrap();
        assert!(results.lock().is_empty());
    }

    #[test]
    fn pool_dispatch_delivers_frames() {
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        let (stage, results) = collecting_stage(64);
        let mut stage = stage.with_pool(pool, 16);

        stage.submit(&[0.3; 64 * 4], 48_000).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while results.lock().len() < 4 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(results.lock().len(), 4);
    }

    #[test]
    fn stalled_pool_keeps_newest_pending_frames() {
        let size = 16;
        let capacity = 4;
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let kernel = Arc::new(GatedKernel {
            size,
            seen: Mutex::new(Vec::new()),
            stalled: AtomicBool::new(false),
            entered: entered_tx,
            release: release_rx,
        });
        let sink: SpectrumSink = Arc::new(|_: u64, _: RawSpectrumResult| {});
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        let mut stage = TransformStage::new(size, WindowType::Hann, kernel.clone(), sink)
            .unwrap()
            .with_pool(pool, capacity);

        // frame k is filled with the constant k + 1
        stage.submit(&[1.0; 16], 8_000).unwrap();
        entered_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        let backlog: Vec<f32> = (2..=capacity + 6)
            .flat_map(|k| std::iter::repeat(k as f32).take(size))
            .collect();
        assert_eq!(stage.submit(&backlog, 8_000).unwrap(), capacity + 5);
        assert_eq!(
            stage.counters().frames_skipped.load(Ordering::Relaxed),
            5
        );

        release_tx.send(()).unwrap();
        let counters = Arc::clone(stage.counters());
        assert!(wait_until(|| {
            counters.frames_transformed.load(Ordering::Relaxed) == capacity as u64 + 1
        }));

        let seen = kernel.seen.lock();
        let tags: Vec<u32> = seen.iter().map(|v| (v / seen[0]).round() as u32).collect();
        assert_eq!(tags, vec![1, 7, 8, 9, 10]);
    }
}
