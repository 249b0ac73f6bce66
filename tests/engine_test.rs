use anyhow::Result;

use basaltdb::common::types::Rid;
use basaltdb::concurrency::IsolationLevel;
use basaltdb::{EngineConfig, StorageEngine};

mod common;
use common::create_temp_db_file;

#[test]
fn test_open_and_allocate_pages() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;
    let config = EngineConfig {
        db_path: path.into(),
        pool_size_per_instance: 8,
        num_instances: 2,
    };
    let engine = StorageEngine::open(&config)?;
    assert_eq!(engine.buffer_pool().pool_size(), 16);

    let (page, page_id) = engine.buffer_pool().new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0x5A;
    }
    engine.buffer_pool().unpin_page(page_id, true)?;
    engine.flush()?;

    let fetched = engine.buffer_pool().fetch_page(page_id)?;
    assert_eq!(fetched.read().data[0], 0x5A);
    engine.buffer_pool().unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_transactions_and_locks_are_wired_together() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;
    let config = EngineConfig {
        db_path: path.into(),
        ..EngineConfig::default()
    };
    let engine = StorageEngine::open(&config)?;

    let txn = engine.transaction_manager().begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);
    engine.lock_manager().lock_exclusive(&txn, rid)?;
    assert!(txn.is_exclusive_locked(rid));

    engine.transaction_manager().commit(&txn)?;
    assert!(!txn.is_exclusive_locked(rid));
    Ok(())
}
