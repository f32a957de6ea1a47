mod builder;
mod node;

pub use self::builder::{StarTree, StarTreeBuilder};
pub use self::node::{NodeId, NodePool, StarNode, ROOT_KEY};
