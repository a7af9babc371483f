use crate::quotes::types::InstrumentRow;
use std::collections::HashMap;

/// Reference values fixed at snapshot time; ticks are computed relative to
/// these, never to the mutated row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub reference_change: f64,
    pub reference_percent: f64,
}

/// Per-symbol baselines for the current snapshot cycle. Replaced wholesale on
/// every successful snapshot and cleared when the next request is issued, so
/// no tick can read values from a prior cycle.
#[derive(Debug, Default)]
pub struct BaselineStore {
    entries: HashMap<String, Baseline>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, rows: &[InstrumentRow]) {
        self.entries.clear();
        for row in rows {
            self.entries.insert(
                row.symbol.clone(),
                Baseline {
                    reference_change: row.change,
                    reference_percent: row.change_percent,
                },
            );
        }
    }

    pub fn get(&self, symbol: &str) -> Option<Baseline> {
        self.entries.get(symbol).copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
