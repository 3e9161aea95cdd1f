use parking_lot::RwLock;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, OnceLock};

static TRIG_TABLES: OnceLock<RwLock<HashMap<usize, Arc<TrigTable>>>> = OnceLock::new();

/// Cosine and sine of `2*pi*i/(size-1)` for every sample index of a frame.
#[derive(Debug)]
pub struct TrigTable {
    size: usize,
    cos: Vec<f32>,
    sin: Vec<f32>,
}

impl TrigTable {
    /// Returns the shared table for `size`, building it on first use.
    ///
    /// Tables live for the rest of the process; only a handful of distinct
    /// transform sizes ever show up.
    pub fn generate(size: usize) -> Arc<TrigTable> {
        let tables = TRIG_TABLES.get_or_init(|| RwLock::new(HashMap::new()));

        if let Some(table) = tables.read().get(&size) {
            return Arc::clone(table);
        }

        let mut guard = tables.write();
        Arc::clone(
            guard
                .entry(size)
                .or_insert_with(|| Arc::new(TrigTable::build(size))),
        )
    }

    fn build(size: usize) -> Self {
        let denom = size.saturating_sub(1).max(1) as f64;
        let (cos, sin) = (0..size)
            .map(|i| {
                let angle = 2.0 * PI * i as f64 / denom;
                (angle.cos() as f32, angle.sin() as f32)
            })
            .unzip();

        log::debug!("Built trig table for size {}", size);
        Self { size, cos, sin }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cos(&self) -> &[f32] {
        &self.cos
    }

    pub fn sin(&self) -> &[f32] {
        &self.sin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_size_shares_one_table() {
        let a = TrigTable::generate(64);
        let b = TrigTable::generate(64);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.size(), 64);
        assert_eq!(a.cos().len(), 64);
        assert_eq!(a.sin().len(), 64);
    }

    #[test]
    fn endpoints_span_a_full_period() {
        let table = TrigTable::generate(32);
        assert!((table.cos()[0] - 1.0).abs() < 1e-6);
        assert!((table.cos()[31] - 1.0).abs() < 1e-5);
        assert!(table.sin()[0].abs() < 1e-6);
    }

    #[test]
    fn distinct_sizes_get_distinct_tables() {
        let a = TrigTable::generate(16);
        let b = TrigTable::generate(128);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.cos().len(), 128);
    }
}
