use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::HeaderPageError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Header page error: {0}")]
    Header(#[from] HeaderPageError),

    #[error("Invalid tree order: {0}")]
    InvalidOrder(String),

    #[error("Tree structure corrupted: {0}")]
    Corrupted(String),
}
