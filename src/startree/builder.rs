use std::collections::HashMap;

use fnv::FnvHashMap;
use log::error;

use crate::aggregate::{reduce, AggFn, ONE, TOTAL_AGG_FNS};
use crate::errors::TreeError;
use crate::startree::node::{NodeId, NodePool, StarNode, ROOT_KEY};
use crate::value::Val;
use crate::wip::{codec, ColWip, WipBlock};

/// A prefix tree over group-by code tuples. Each root→leaf path encodes
/// one distinct tuple in column order; internal nodes cache the reduction
/// over their subtree once `aggregate` has run.
pub struct StarTree {
    root: NodeId,
}

impl StarTree {
    pub fn root(&self) -> NodeId {
        self.root
    }
}

/// Builds one `StarTree` per segment block. The builder owns the node
/// pool, the per-column dictionaries and the record→code scratch vectors,
/// and retains all of their capacity across `reset` calls, so steady-state
/// memory is bounded by the largest block seen.
///
/// Not reentrant: callers that build blocks in parallel own one builder
/// per worker.
pub struct StarTreeBuilder {
    group_by_keys: Vec<String>,
    m_col_names: Vec<String>,
    pool: NodePool,
    tree: StarTree,
    /// Per group-by column: raw string → code.
    seg_dict_map: Vec<FnvHashMap<String, u32>>,
    /// Per group-by column: code → raw string readback.
    seg_dict_enc_rev: Vec<Vec<String>>,
    /// Next unassigned code per column; doubles as the distinct count.
    seg_dict_last_num: Vec<u32>,
    /// Per group-by column: record index → code, for the current block.
    wip_rec_num_to_col_enc: Vec<Vec<u32>>,
}

impl Default for StarTreeBuilder {
    fn default() -> StarTreeBuilder {
        StarTreeBuilder {
            group_by_keys: Vec::new(),
            m_col_names: Vec::new(),
            pool: NodePool::default(),
            tree: StarTree { root: 0 },
            seg_dict_map: Vec::new(),
            seg_dict_enc_rev: Vec::new(),
            seg_dict_last_num: Vec::new(),
            wip_rec_num_to_col_enc: Vec::new(),
        }
    }
}

impl StarTreeBuilder {
    pub fn new() -> StarTreeBuilder {
        StarTreeBuilder::default()
    }

    /// Prepares the builder for the next block. Detaches and recycles all
    /// nodes, clears every column dictionary and installs a fresh root.
    ///
    /// `dict_scratch` provides pre-sized reverse-code buffers; the buffer
    /// for any column slot the builder has not seen yet is moved into the
    /// builder and reused from then on.
    pub fn reset(
        &mut self,
        group_by_keys: Vec<String>,
        m_col_names: Vec<String>,
        dict_scratch: &mut Vec<Vec<String>>,
    ) {
        self.group_by_keys = group_by_keys;
        self.m_col_names = m_col_names;

        self.pool.reset();
        let root = self.pool.acquire();
        self.pool[root].my_key = ROOT_KEY;
        self.tree = StarTree { root };

        let num_cols = self.group_by_keys.len();
        if self.seg_dict_enc_rev.len() > num_cols {
            self.seg_dict_enc_rev.truncate(num_cols);
            self.seg_dict_map.truncate(num_cols);
            self.seg_dict_last_num.truncate(num_cols);
            self.wip_rec_num_to_col_enc.truncate(num_cols);
        }
        while self.seg_dict_enc_rev.len() < num_cols {
            let col_num = self.seg_dict_enc_rev.len();
            let rev = dict_scratch
                .get_mut(col_num)
                .map(std::mem::take)
                .unwrap_or_default();
            self.seg_dict_enc_rev.push(rev);
            self.seg_dict_map.push(FnvHashMap::default());
            self.seg_dict_last_num.push(0);
            self.wip_rec_num_to_col_enc.push(Vec::new());
        }
        for col_num in 0..num_cols {
            self.seg_dict_enc_rev[col_num].clear();
            self.seg_dict_map[col_num].clear();
            self.seg_dict_last_num[col_num] = 0;
        }
    }

    /// Discards the current tree and dictionaries, keeping the group-by
    /// and measure column names.
    pub fn drop_tree(&mut self, dict_scratch: &mut Vec<Vec<String>>) {
        let group_by_keys = std::mem::take(&mut self.group_by_keys);
        let m_col_names = std::mem::take(&mut self.m_col_names);
        self.reset(group_by_keys, m_col_names, dict_scratch);
    }

    /// Runs the encode and insert passes over `wip`. On error the tree for
    /// this block is invalid and the caller must `reset` before reuse.
    pub fn compute(&mut self, wip: &WipBlock) -> Result<(), TreeError> {
        ensure!(self.pool.used() > 0, "compute called before reset");
        if wip.record_count() == 0 {
            return Ok(());
        }
        self.create_enc(wip)?;
        self.build_tree_structure(wip)
    }

    /// Bottom-up roll-up: after this every node on every path holds the
    /// reduction over its subtree's leaves. A childless root keeps the
    /// aggregate the insert pass folded into it (the zero-group-by case).
    pub fn aggregate(&mut self) -> Result<(), TreeError> {
        ensure!(self.pool.used() > 0, "aggregate called before reset");
        let root = self.tree.root;
        ensure!(
            self.pool[root].common_children.is_none(),
            "aggregate called during level removal"
        );
        self.aggregate_node(root)
    }

    /// Deletes dimension `level_to_remove` from the prefix ordering,
    /// merging the duplicate siblings that result. Level indices refer to
    /// the tree as it is at call time; the removed key is dropped from
    /// `group_by_keys` so a later call sees the post-removal ordering.
    ///
    /// Merging folds leaf aggregates into nodes that must not hold
    /// roll-up values yet: call this after `compute` and before
    /// `aggregate`.
    pub fn remove_level(&mut self, level_to_remove: u32) -> Result<(), TreeError> {
        let num_cols = self.group_by_keys.len();
        let level = level_to_remove as usize;
        ensure!(
            level < num_cols,
            "cannot remove level {} from a tree with {} group-by columns",
            level,
            num_cols
        );
        self.remove_level_from_tree(self.tree.root, 0, level, num_cols - 1)?;

        self.group_by_keys.remove(level);
        self.seg_dict_map.remove(level);
        self.seg_dict_enc_rev.remove(level);
        self.seg_dict_last_num.remove(level);
        self.wip_rec_num_to_col_enc.remove(level);
        Ok(())
    }

    // ---- inspection -----------------------------------------------------

    pub fn tree(&self) -> &StarTree {
        &self.tree
    }

    pub fn node(&self, id: NodeId) -> &StarNode {
        &self.pool[id]
    }

    /// Nodes handed out for the current block, root included.
    pub fn node_count(&self) -> usize {
        self.pool.used()
    }

    pub fn group_by_keys(&self) -> &[String] {
        &self.group_by_keys
    }

    pub fn measure_col_names(&self) -> &[String] {
        &self.m_col_names
    }

    /// Code assigned to `raw` in group-by column `col_num`, if seen.
    pub fn col_code(&self, col_num: usize, raw: &str) -> Option<u32> {
        self.seg_dict_map.get(col_num)?.get(raw).copied()
    }

    /// Readback of the raw value behind `code` in group-by column
    /// `col_num`.
    pub fn col_raw_val(&self, col_num: usize, code: u32) -> Option<&str> {
        self.seg_dict_enc_rev
            .get(col_num)?
            .get(code as usize)
            .map(|s| s.as_str())
    }

    /// Distinct-value count per group-by column for the current block.
    pub fn each_col_node_count(&self) -> HashMap<String, u32> {
        self.group_by_keys
            .iter()
            .zip(&self.seg_dict_last_num)
            .map(|(name, &last_num)| (name.clone(), last_num))
            .collect()
    }

    // ---- encode pass ----------------------------------------------------

    fn set_col_val_enc(&mut self, col_num: usize, col_val: &str) -> u32 {
        if let Some(&enc) = self.seg_dict_map[col_num].get(col_val) {
            return enc;
        }
        let enc = self.seg_dict_last_num[col_num];
        self.seg_dict_map[col_num].insert(col_val.to_string(), enc);
        self.seg_dict_enc_rev[col_num].push(col_val.to_string());
        self.seg_dict_last_num[col_num] += 1;
        enc
    }

    /// Fills `wip_rec_num_to_col_enc` for every group-by column, reading
    /// each column through whichever access mode the block advertises.
    fn create_enc(&mut self, wip: &WipBlock) -> Result<(), TreeError> {
        let num_recs = wip.record_count() as usize;

        for col_num in 0..self.group_by_keys.len() {
            let col_name = self.group_by_keys[col_num].clone();
            let cwip = wip
                .col(&col_name)
                .ok_or_else(|| fatal!("block has no column {}", col_name))?;
            self.wip_rec_num_to_col_enc[col_num].clear();
            self.wip_rec_num_to_col_enc[col_num].resize(num_recs, 0);

            if cwip.de_data().is_dict_encoded() {
                for (encoded, rec_nums) in cwip.de_data().iter() {
                    let (val, _) = codec::decode_val(encoded, 0)?;
                    let enc = self.set_col_val_enc(col_num, group_by_str(&col_name, &val)?);
                    for &rec_num in rec_nums {
                        self.wip_rec_num_to_col_enc[col_num][rec_num as usize] = enc;
                    }
                }
                continue;
            }

            // High-cardinality column: walk the raw buffer, one value per
            // record.
            let cbuf = cwip.cbuf();
            let mut offset = 0;
            for rec_num in 0..num_recs {
                let (val, next) = codec::decode_val(cbuf, offset)?;
                offset = next;
                let enc = self.set_col_val_enc(col_num, group_by_str(&col_name, &val)?);
                self.wip_rec_num_to_col_enc[col_num][rec_num] = enc;
            }
            if offset < cbuf.len() {
                error!(
                    "create_enc: decoded all {} records of column {} but consumed {} of {} bytes",
                    num_recs,
                    col_name,
                    offset,
                    cbuf.len()
                );
            }
        }
        Ok(())
    }

    // ---- insert pass ----------------------------------------------------

    fn build_tree_structure(&mut self, wip: &WipBlock) -> Result<(), TreeError> {
        let num_recs = wip.record_count();
        let num_cols = self.group_by_keys.len();
        let m_col_names = self.m_col_names.clone();
        let len_agg_values = m_col_names.len() * TOTAL_AGG_FNS;

        let mut cur_col_values = vec![0u32; num_cols];
        // Read offsets into each raw-mode measure column.
        let mut meas_cidx = vec![0usize; m_col_names.len()];

        for rec_num in 0..num_recs {
            for col_num in 0..num_cols {
                cur_col_values[col_num] = self.wip_rec_num_to_col_enc[col_num][rec_num as usize];
            }
            let node = self.insert_into_tree(self.tree.root, &cur_col_values, 0);
            for (mc_num, mc_name) in m_col_names.iter().enumerate() {
                let cwip = wip
                    .col(mc_name)
                    .ok_or_else(|| fatal!("block has no measure column {}", mc_name))?;
                let val = get_meas_cval(cwip, rec_num, &mut meas_cidx, mc_num)?;
                self.add_measures(&val, len_agg_values, mc_num * TOTAL_AGG_FNS, node)?;
            }
        }
        Ok(())
    }

    /// Descends from `node`, allocating children as needed, and returns
    /// the node at depth `col_vals.len()`. With no group-by columns that
    /// is the node passed in, so the root doubles as the only leaf.
    fn insert_into_tree(&mut self, node: NodeId, col_vals: &[u32], idx: usize) -> NodeId {
        if idx == col_vals.len() {
            return node;
        }
        let key = col_vals[idx];
        let child = match self.pool[node].children.get(&key) {
            Some(&child) => child,
            None => {
                let child = self.pool.acquire();
                self.pool[child].my_key = key;
                self.pool[child].parent = Some(node);
                self.pool[node].children.insert(key, child);
                child
            }
        };
        self.insert_into_tree(child, col_vals, idx + 1)
    }

    /// Folds one record's measure value into the leaf's slot group at
    /// `midx`, allocating the aggregate vector on first contribution.
    fn add_measures(
        &mut self,
        val: &Val,
        len_agg_values: usize,
        midx: usize,
        node: NodeId,
    ) -> Result<(), TreeError> {
        if self.pool[node].agg_values.is_empty() {
            self.pool[node].agg_values.resize(len_agg_values, Val::Null);
        }
        for f in AggFn::ALL {
            let slot = midx + f.slot();
            // Count folds the constant one, never the value.
            let right = if f == AggFn::Count { &ONE } else { val };
            let merged = reduce(&self.pool[node].agg_values[slot], right, f)?;
            self.pool[node].agg_values[slot] = merged;
        }
        Ok(())
    }

    // ---- aggregation ----------------------------------------------------

    fn aggregate_node(&mut self, node: NodeId) -> Result<(), TreeError> {
        let len_agg_values = self.m_col_names.len() * TOTAL_AGG_FNS;
        let children: Vec<NodeId> = self.pool[node].children.values().copied().collect();
        if children.is_empty() {
            return Ok(());
        }

        let mut first = true;
        for child in children {
            self.aggregate_node(child)?;
            ensure!(
                self.pool[child].agg_values.len() == len_agg_values,
                "node {} has {} aggregate slots, expected {}",
                self.pool[child].my_key,
                self.pool[child].agg_values.len(),
                len_agg_values
            );
            if first {
                let child_agg = self.pool[child].agg_values.clone();
                self.pool[node].agg_values = child_agg;
                first = false;
                continue;
            }
            for mc_num in 0..self.m_col_names.len() {
                let midx = mc_num * TOTAL_AGG_FNS;
                for f in AggFn::ALL {
                    let slot = midx + f.slot();
                    let merged = reduce(
                        &self.pool[node].agg_values[slot],
                        &self.pool[child].agg_values[slot],
                        f,
                    )?;
                    self.pool[node].agg_values[slot] = merged;
                }
            }
        }
        Ok(())
    }

    // ---- level removal --------------------------------------------------

    fn remove_level_from_tree(
        &mut self,
        node: NodeId,
        curr_idx: usize,
        idx_to_remove: usize,
        last_idx: usize,
    ) -> Result<(), TreeError> {
        if curr_idx == idx_to_remove {
            if curr_idx == last_idx {
                return self.update_last_level(node);
            }

            // Adopt all grandchildren, grouped by key: siblings that share
            // a key after the dimension is dropped must be merged.
            let mut common_children: FnvHashMap<u32, Vec<NodeId>> = FnvHashMap::default();
            let children: Vec<(u32, NodeId)> = self.pool[node].children.drain().collect();
            for (_child_key, child) in children {
                let grandchildren: Vec<(u32, NodeId)> =
                    self.pool[child].children.drain().collect();
                for (key, grandchild) in grandchildren {
                    self.pool[grandchild].parent = Some(node);
                    common_children.entry(key).or_default().push(grandchild);
                }
                self.pool[child].parent = None;
            }
            self.pool[node].common_children = Some(common_children);

            return self.cleanup_common(node, curr_idx + 1, last_idx);
        }

        let children: Vec<NodeId> = self.pool[node].children.values().copied().collect();
        for child in children {
            self.remove_level_from_tree(child, curr_idx + 1, idx_to_remove, last_idx)?;
        }
        Ok(())
    }

    /// Removing the leaf dimension: fold every leaf into its parent, which
    /// becomes the new leaf.
    fn update_last_level(&mut self, node: NodeId) -> Result<(), TreeError> {
        let children: Vec<(u32, NodeId)> = self.pool[node].children.drain().collect();
        for (_key, child) in children {
            self.update_agg_vals(node, child)?;
        }
        Ok(())
    }

    /// Merges duplicate siblings under `node.common_children`. The first
    /// node of each key group survives; the rest fold into it. `reduce`
    /// commutes and associates, so the grouping order cannot change the
    /// result.
    fn cleanup_common(
        &mut self,
        node: NodeId,
        curr_idx: usize,
        last_idx: usize,
    ) -> Result<(), TreeError> {
        let common_children = match self.pool[node].common_children.take() {
            Some(common) => common,
            None => return Ok(()),
        };

        if curr_idx == last_idx {
            for (_key, nodes) in common_children {
                let fixed = first_of(&nodes)?;
                for &other in &nodes[1..] {
                    self.update_agg_vals(fixed, other)?;
                }
                let my_key = self.pool[fixed].my_key;
                self.pool[node].children.insert(my_key, fixed);
            }
            return Ok(());
        }

        // Regroup all grandchildren of each key group under its survivor.
        for nodes in common_children.values() {
            let fixed = first_of(nodes)?;
            let mut gathered: FnvHashMap<u32, Vec<NodeId>> = FnvHashMap::default();
            for &merged in nodes {
                let children: Vec<(u32, NodeId)> = self.pool[merged].children.drain().collect();
                for (key, child) in children {
                    self.pool[child].parent = Some(fixed);
                    gathered.entry(key).or_default().push(child);
                }
            }
            self.pool[fixed].common_children = Some(gathered);
        }

        for (_key, nodes) in common_children {
            let fixed = first_of(&nodes)?;
            self.cleanup_common(fixed, curr_idx + 1, last_idx)?;
            let my_key = self.pool[fixed].my_key;
            self.pool[node].children.insert(my_key, fixed);
        }
        Ok(())
    }

    /// Folds `node_to_merge`'s aggregate vector into `node` slot by slot.
    fn update_agg_vals(&mut self, node: NodeId, node_to_merge: NodeId) -> Result<(), TreeError> {
        let merge_agg = self.pool[node_to_merge].agg_values.clone();
        if self.pool[node].agg_values.is_empty() {
            self.pool[node].agg_values.resize(merge_agg.len(), Val::Null);
        }
        for mc_num in 0..self.m_col_names.len() {
            let midx = mc_num * TOTAL_AGG_FNS;
            for f in AggFn::ALL {
                let slot = midx + f.slot();
                ensure!(
                    slot < self.pool[node].agg_values.len() && slot < merge_agg.len(),
                    "node {} is missing aggregate slot {}",
                    self.pool[node].my_key,
                    slot
                );
                let merged = reduce(&self.pool[node].agg_values[slot], &merge_agg[slot], f)?;
                self.pool[node].agg_values[slot] = merged;
            }
        }
        Ok(())
    }
}

fn first_of(nodes: &[NodeId]) -> Result<NodeId, TreeError> {
    nodes
        .first()
        .copied()
        .ok_or_else(|| fatal!("empty sibling group during level removal"))
}

// Group-by columns hold strings; anything else cannot be dictionary
// encoded for readback.
fn group_by_str<'a>(col_name: &str, val: &'a Val) -> Result<&'a str, TreeError> {
    match val {
        Val::Str(s) => Ok(s),
        other => Err(TreeError::TypeMismatch(format!(
            "group-by column {} holds non-string value {}",
            col_name, other
        ))),
    }
}

/// Extracts one record's measure value through the column's advertised
/// access mode: dictionary lookup while the block kept one, sequential
/// raw-buffer reads otherwise.
fn get_meas_cval(
    cwip: &ColWip,
    rec_num: u16,
    cidx: &mut [usize],
    col_num: usize,
) -> Result<Val, TreeError> {
    if cwip.de_data().is_dict_encoded() {
        return cwip.dict_val_for_rec(rec_num);
    }
    let (val, next) = codec::decode_val(cwip.cbuf(), cidx[col_num])?;
    cidx[col_num] = next;
    Ok(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_builder(
        builder: &mut StarTreeBuilder,
        group_by: &[&str],
        measures: &[&str],
    ) {
        let mut scratch: Vec<Vec<String>> =
            (0..group_by.len()).map(|_| Vec::with_capacity(64)).collect();
        builder.reset(
            group_by.iter().map(|s| s.to_string()).collect(),
            measures.iter().map(|s| s.to_string()).collect(),
            &mut scratch,
        );
    }

    fn two_dim_block() -> WipBlock {
        let mut wip = WipBlock::default();
        for (host, status, latency) in [
            ("h1", "200", 10i64),
            ("h1", "200", 30),
            ("h1", "500", 5),
            ("h2", "200", 20),
        ] {
            wip.push_record(&[
                ("host", Val::from(host)),
                ("status", Val::from(status)),
                ("latency", Val::Int(latency)),
            ]);
        }
        wip
    }

    #[test]
    fn test_codes_are_dense_and_first_seen() {
        let mut builder = StarTreeBuilder::new();
        reset_builder(&mut builder, &["host", "status"], &["latency"]);
        builder.compute(&two_dim_block()).unwrap();

        let counts = builder.each_col_node_count();
        assert_eq!(counts["host"], 2);
        assert_eq!(counts["status"], 2);
        // Root plus two host nodes plus three (host, status) leaves.
        assert_eq!(builder.node_count(), 6);
    }

    #[test]
    fn test_paths_have_group_by_length() {
        let mut builder = StarTreeBuilder::new();
        reset_builder(&mut builder, &["host", "status"], &["latency"]);
        builder.compute(&two_dim_block()).unwrap();

        let root = builder.tree().root();
        assert_eq!(builder.node(root).my_key(), ROOT_KEY);
        for &level0 in builder.node(root).children().values() {
            assert_eq!(builder.node(level0).parent(), Some(root));
            assert!(!builder.node(level0).children().is_empty());
            for &leaf in builder.node(level0).children().values() {
                assert_eq!(builder.node(leaf).parent(), Some(level0));
                assert!(builder.node(leaf).children().is_empty());
            }
        }
    }

    #[test]
    fn test_reset_reuses_pool() {
        let mut builder = StarTreeBuilder::new();
        reset_builder(&mut builder, &["host", "status"], &["latency"]);
        builder.compute(&two_dim_block()).unwrap();
        assert_eq!(builder.node_count(), 6);

        // A one-record block after reset reuses slots; the count reflects
        // only the new block.
        let mut wip = WipBlock::default();
        wip.push_record(&[
            ("host", Val::from("h9")),
            ("status", Val::from("200")),
            ("latency", Val::Int(1)),
        ]);
        reset_builder(&mut builder, &["host", "status"], &["latency"]);
        builder.compute(&wip).unwrap();
        assert_eq!(builder.node_count(), 3);
        let counts = builder.each_col_node_count();
        assert_eq!(counts["host"], 1);
    }

    #[test]
    fn test_compute_before_reset_is_invariant_violation() {
        let mut builder = StarTreeBuilder::new();
        let err = builder.compute(&two_dim_block()).unwrap_err();
        assert!(matches!(err, TreeError::InvariantViolation(..)));
    }

    #[test]
    fn test_remove_level_out_of_range() {
        let mut builder = StarTreeBuilder::new();
        reset_builder(&mut builder, &["host"], &["latency"]);
        let err = builder.remove_level(1).unwrap_err();
        assert!(matches!(err, TreeError::InvariantViolation(..)));
    }

    #[test]
    fn test_missing_column_is_invariant_violation() {
        let mut builder = StarTreeBuilder::new();
        reset_builder(&mut builder, &["nosuchcol"], &[]);
        let err = builder.compute(&two_dim_block()).unwrap_err();
        assert!(matches!(err, TreeError::InvariantViolation(..)));
    }

    #[test]
    fn test_non_string_group_by_is_type_mismatch() {
        let mut wip = WipBlock::default();
        wip.push_record(&[("host", Val::Int(7)), ("latency", Val::Int(1))]);
        let mut builder = StarTreeBuilder::new();
        reset_builder(&mut builder, &["host"], &["latency"]);
        let err = builder.compute(&wip).unwrap_err();
        assert!(matches!(err, TreeError::TypeMismatch(_)));
    }

    #[test]
    fn test_drop_tree_keeps_names() {
        let mut builder = StarTreeBuilder::new();
        reset_builder(&mut builder, &["host", "status"], &["latency"]);
        builder.compute(&two_dim_block()).unwrap();

        let mut scratch = Vec::new();
        builder.drop_tree(&mut scratch);
        assert_eq!(builder.group_by_keys(), &["host", "status"]);
        assert_eq!(builder.measure_col_names(), &["latency"]);
        assert_eq!(builder.node_count(), 1);

        builder.compute(&two_dim_block()).unwrap();
        assert_eq!(builder.node_count(), 6);
    }
}
