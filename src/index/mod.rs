pub mod btree;
pub mod hash;
pub mod key;

pub use btree::BPlusTree;
pub use hash::ExtendibleHashIndex;
pub use key::Storable;
