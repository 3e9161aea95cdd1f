pub mod analysis;
pub mod queue;
pub mod transform;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use analysis::{AnalysisPipeline, PipelineStats, SpectralData};
pub use queue::{DropOldestQueue, Pop, PushOutcome, RingBuffer};
pub use transform::TransformStage;

/// One-way stop signal shared by a pipeline's workers and FFT tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
