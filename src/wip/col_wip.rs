use fnv::FnvHashMap;

use crate::errors::TreeError;
use crate::value::Val;
use crate::wip::codec;

/// Distinct-value threshold up to which a column keeps its per-block
/// dictionary. Past it, readers must walk the raw buffer.
pub const WIP_CARD_LIMIT: usize = 256;

/// Per-block dictionary: a value's encoded bytes mapped to the record
/// indices holding it. Record lists stay sorted because records arrive in
/// index order.
#[derive(Default, Clone, Debug)]
pub struct DeData {
    de_map: FnvHashMap<Vec<u8>, Vec<u16>>,
    de_count: usize,
    over_limit: bool,
}

impl DeData {
    pub fn de_count(&self) -> usize {
        self.de_count
    }

    pub fn is_dict_encoded(&self) -> bool {
        !self.over_limit
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u16])> {
        self.de_map.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    fn record(&mut self, encoded: &[u8], rec_num: u16) {
        if self.over_limit {
            return;
        }
        if let Some(recs) = self.de_map.get_mut(encoded) {
            recs.push(rec_num);
            return;
        }
        if self.de_count == WIP_CARD_LIMIT {
            self.de_map.clear();
            self.over_limit = true;
            return;
        }
        self.de_map.insert(encoded.to_vec(), vec![rec_num]);
        self.de_count += 1;
    }

    fn clear(&mut self) {
        self.de_map.clear();
        self.de_count = 0;
        self.over_limit = false;
    }
}

/// One column of a block under construction: the raw variable-length
/// buffer holding every value in record order, plus the per-block
/// dictionary while cardinality permits.
#[derive(Default, Clone, Debug)]
pub struct ColWip {
    cbuf: Vec<u8>,
    de_data: DeData,
}

impl ColWip {
    pub fn push(&mut self, rec_num: u16, val: &Val) {
        let start = self.cbuf.len();
        codec::encode_val(&mut self.cbuf, val);
        let encoded = self.cbuf[start..].to_vec();
        self.de_data.record(&encoded, rec_num);
    }

    pub fn cbuf(&self) -> &[u8] {
        &self.cbuf
    }

    pub fn de_data(&self) -> &DeData {
        &self.de_data
    }

    /// Decodes the value for `rec_num` through the dictionary. Only valid
    /// while the column is dict-encoded.
    pub fn dict_val_for_rec(&self, rec_num: u16) -> Result<Val, TreeError> {
        for (encoded, rec_nums) in self.de_data.iter() {
            if rec_nums.binary_search(&rec_num).is_ok() {
                let (val, _) = codec::decode_val(encoded, 0)?;
                return Ok(val);
            }
        }
        Err(TreeError::Decode(format!(
            "no dictionary entry covers record {}",
            rec_num
        )))
    }

    pub fn clear(&mut self) {
        self.cbuf.clear();
        self.de_data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_tracks_distinct_values() {
        let mut col = ColWip::default();
        col.push(0, &Val::from("mac"));
        col.push(1, &Val::from("ios"));
        col.push(2, &Val::from("mac"));
        assert!(col.de_data().is_dict_encoded());
        assert_eq!(col.de_data().de_count(), 2);
        assert_eq!(col.dict_val_for_rec(2).unwrap(), Val::from("mac"));
        assert_eq!(col.dict_val_for_rec(1).unwrap(), Val::from("ios"));
    }

    #[test]
    fn test_cardinality_spill() {
        let mut col = ColWip::default();
        for i in 0..(WIP_CARD_LIMIT + 10) {
            col.push(i as u16, &Val::from(format!("v{}", i)));
        }
        assert!(!col.de_data().is_dict_encoded());
        // The raw buffer still holds every value in record order.
        let mut offset = 0;
        let mut count = 0;
        while offset < col.cbuf().len() {
            let (val, next) = codec::decode_val(col.cbuf(), offset).unwrap();
            assert_eq!(val, Val::from(format!("v{}", count)));
            offset = next;
            count += 1;
        }
        assert_eq!(count, WIP_CARD_LIMIT + 10);
    }
}
