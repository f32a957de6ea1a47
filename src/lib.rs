//! StarTree pre-aggregation engine: builds an in-memory prefix tree over a
//! segment block's group-by columns, with per-node min/max/sum/count
//! aggregates, so group-by queries read cached aggregates instead of
//! scanning raw records.

#[macro_use]
mod errors;
mod aggregate;
mod startree;
mod value;
mod wip;

pub use crate::aggregate::{reduce, AggFn, ONE, TOTAL_AGG_FNS};
pub use crate::errors::TreeError;
pub use crate::startree::{NodeId, NodePool, StarNode, StarTree, StarTreeBuilder, ROOT_KEY};
pub use crate::value::{BasicType, Val};
pub use crate::wip::{codec, ColWip, DeData, WipBlock, WIP_CARD_LIMIT};
