use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{Result, SpectrumError};

pub const DEFAULT_MIN_DB: f32 = -90.0;
pub const DEFAULT_MAX_DB: f32 = 0.0;
pub const DEFAULT_AMPLIFICATION: f32 = 1.0;

/// Immutable copy of the gain settings taken once per conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSnapshot {
    pub min_db: f32,
    /// Always at least `f32::EPSILON`.
    pub db_range: f32,
    pub amplification: f32,
}

impl GainSnapshot {
    pub fn new(min_db: f32, max_db: f32, amplification: f32) -> Self {
        Self {
            min_db,
            db_range: (max_db - min_db).max(f32::EPSILON),
            amplification: amplification.max(0.0),
        }
    }
}

impl Default for GainSnapshot {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DB, DEFAULT_MAX_DB, DEFAULT_AMPLIFICATION)
    }
}

/// Gain settings shared between a control thread and the conversion worker.
///
/// Both dB bounds live in one atomic word, so `min_db < max_db` holds for
/// every reader even with concurrent writers. Amplification is stored apart
/// and a snapshot may pair it with the previous range for one cycle.
#[derive(Debug)]
pub struct GainParameters {
    range: AtomicU64,
    amplification: AtomicU32,
}

impl GainParameters {
    pub fn new(min_db: f32, max_db: f32, amplification: f32) -> Result<Self> {
        validate_range(min_db, max_db)?;
        validate_amplification(amplification)?;
        Ok(Self {
            range: AtomicU64::new(pack_range(min_db, max_db)),
            amplification: AtomicU32::new(amplification.to_bits()),
        })
    }

    pub fn min_db(&self) -> f32 {
        self.range().0
    }

    pub fn max_db(&self) -> f32 {
        self.range().1
    }

    /// `(min_db, max_db)` read together.
    pub fn range(&self) -> (f32, f32) {
        unpack_range(self.range.load(Ordering::Acquire))
    }

    pub fn amplification(&self) -> f32 {
        f32::from_bits(self.amplification.load(Ordering::Relaxed))
    }

    pub fn set_range(&self, min_db: f32, max_db: f32) -> Result<()> {
        self.update_range(|_, _| (min_db, max_db))
    }

    pub fn set_min_db(&self, min_db: f32) -> Result<()> {
        self.update_range(|_, max_db| (min_db, max_db))
    }

    pub fn set_max_db(&self, max_db: f32) -> Result<()> {
        self.update_range(|min_db, _| (min_db, max_db))
    }

    /// Validates and stores `update(current)` unless another writer got in
    /// between, in which case it retries against the newer range.
    fn update_range<F: Fn(f32, f32) -> (f32, f32)>(&self, update: F) -> Result<()> {
        let mut current = self.range.load(Ordering::Acquire);
        loop {
            let (min_db, max_db) = unpack_range(current);
            let (min_db, max_db) = update(min_db, max_db);
            validate_range(min_db, max_db)?;
            match self.range.compare_exchange_weak(
                current,
                pack_range(min_db, max_db),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn set_amplification(&self, amplification: f32) -> Result<()> {
        validate_amplification(amplification)?;
        self.amplification
            .store(amplification.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn snapshot(&self) -> GainSnapshot {
        let (min_db, max_db) = self.range();
        GainSnapshot::new(min_db, max_db, self.amplification())
    }
}

impl Default for GainParameters {
    fn default() -> Self {
        Self {
            range: AtomicU64::new(pack_range(DEFAULT_MIN_DB, DEFAULT_MAX_DB)),
            amplification: AtomicU32::new(DEFAULT_AMPLIFICATION.to_bits()),
        }
    }
}

fn pack_range(min_db: f32, max_db: f32) -> u64 {
    (u64::from(min_db.to_bits()) << 32) | u64::from(max_db.to_bits())
}

fn unpack_range(bits: u64) -> (f32, f32) {
    (
        f32::from_bits((bits >> 32) as u32),
        f32::from_bits(bits as u32),
    )
}

pub(crate) fn validate_range(min_db: f32, max_db: f32) -> Result<()> {
    if !min_db.is_finite() || !max_db.is_finite() {
        return Err(SpectrumError::config(format!(
            "dB bounds must be finite (min={}, max={})",
            min_db, max_db
        )));
    }
    if min_db >= max_db {
        return Err(SpectrumError::config(format!(
            "min_db ({}) must be below max_db ({})",
            min_db, max_db
        )));
    }
    Ok(())
}

pub(crate) fn validate_amplification(amplification: f32) -> Result<()> {
    if !amplification.is_finite() || amplification < 0.0 {
        return Err(SpectrumError::config(format!(
            "amplification must be a finite value >= 0, got {}",
            amplification
        )));
    }
    Ok(())
}
