mod col_wip;
pub mod codec;

use std::collections::HashMap;

pub use self::col_wip::{ColWip, DeData, WIP_CARD_LIMIT};

use crate::value::Val;

/// A contiguous batch of records in columnar layout. Record indices are
/// assigned in arrival order; every column buffer is addressed by them.
#[derive(Default, Clone, Debug)]
pub struct WipBlock {
    col_wips: HashMap<String, ColWip>,
    record_count: u16,
}

impl WipBlock {
    pub fn push_record(&mut self, row: &[(&str, Val)]) {
        let rec_num = self.record_count;
        for (name, val) in row {
            let col = self.col_wips.entry(name.to_string()).or_default();
            col.push(rec_num, val);
        }
        self.record_count += 1;
    }

    pub fn record_count(&self) -> u16 {
        self.record_count
    }

    pub fn col(&self, name: &str) -> Option<&ColWip> {
        self.col_wips.get(name)
    }

    /// Empties every column buffer for reuse, keeping their capacity.
    pub fn clear(&mut self) {
        for col in self.col_wips.values_mut() {
            col.clear();
        }
        self.record_count = 0;
    }
}
