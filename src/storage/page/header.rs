use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::common::types::{Page, PageId};

#[derive(Error, Debug)]
pub enum HeaderPageError {
    #[error("Failed to decode header records: {0}")]
    Decode(String),
    #[error("Failed to encode header records: {0}")]
    Encode(String),
    #[error("Header page is full")]
    PageFull,
}

/// One `(index_name -> root_page_id)` record in the header page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexRootRecord {
    pub name: String,
    pub root_page_id: PageId,
}

/// View over the header page, which stores the root page IDs of every index
/// as a bincode-encoded record vector. A zeroed page decodes as "no records".
pub struct HeaderPage<'a> {
    page: &'a mut Page,
}

impl<'a> HeaderPage<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        Self { page }
    }

    fn read_records(page: &Page) -> Result<Vec<IndexRootRecord>, HeaderPageError> {
        bincode::deserialize(&page.data[..])
            .map_err(|e| HeaderPageError::Decode(e.to_string()))
    }

    fn write_records(&mut self, records: &[IndexRootRecord]) -> Result<(), HeaderPageError> {
        let encoded = bincode::serialize(records)
            .map_err(|e| HeaderPageError::Encode(e.to_string()))?;
        if encoded.len() > self.page.data.len() {
            return Err(HeaderPageError::PageFull);
        }
        self.page.data[..encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }

    /// Look up the root page ID recorded for an index
    pub fn get_root(page: &Page, name: &str) -> Result<Option<PageId>, HeaderPageError> {
        let records = Self::read_records(page)?;
        Ok(records.iter().find(|r| r.name == name).map(|r| r.root_page_id))
    }

    /// Insert or update the record for an index
    pub fn set_root(&mut self, name: &str, root_page_id: PageId) -> Result<(), HeaderPageError> {
        let mut records = Self::read_records(self.page)?;
        match records.iter_mut().find(|r| r.name == name) {
            Some(record) => record.root_page_id = root_page_id,
            None => records.push(IndexRootRecord {
                name: name.to_string(),
                root_page_id,
            }),
        }
        self.write_records(&records)
    }

    /// Drop the record for an index
    pub fn remove_record(&mut self, name: &str) -> Result<(), HeaderPageError> {
        let mut records = Self::read_records(self.page)?;
        records.retain(|r| r.name != name);
        self.write_records(&records)
    }
}
