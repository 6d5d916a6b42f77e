pub mod codec;
pub mod comparator;
pub mod error;
pub mod index;
pub mod node;

pub use comparator::{KeyComparator, SliceComparator};
pub use error::BTreeError;
pub use index::{BPlusTree, TreeIterator};
pub use node::BTreeNode;
