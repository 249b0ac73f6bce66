pub mod index;
pub mod page;

pub use index::{ExtendibleHashIndex, HashIndexError};
