use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use basaltdb::common::types::Rid;
use basaltdb::concurrency::{
    IsolationLevel, LockError, LockManager, TransactionManager, TransactionState,
};

fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for: {}", what);
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = TransactionManager::new(lock_manager.clone());

    let t0 = tm.begin(IsolationLevel::RepeatableRead);
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    lock_manager.lock_shared(&t0, rid)?;
    lock_manager.lock_shared(&t1, rid)?;
    assert!(t0.is_shared_locked(rid));
    assert!(t1.is_shared_locked(rid));

    tm.commit(&t0)?;
    tm.commit(&t1)?;
    Ok(())
}

#[test]
fn test_exclusive_blocks_younger_shared() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lock_manager.clone()));

    let older = tm.begin(IsolationLevel::RepeatableRead);
    let younger = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    lock_manager.lock_exclusive(&older, rid)?;

    let handle = {
        let lock_manager = lock_manager.clone();
        let younger = younger.clone();
        thread::spawn(move || lock_manager.lock_shared(&younger, rid))
    };

    // The younger reader must not get through while the writer holds the lock
    thread::sleep(Duration::from_millis(100));
    assert!(!younger.is_shared_locked(rid));

    tm.commit(&older)?;
    handle.join().expect("reader thread panicked")?;
    assert!(younger.is_shared_locked(rid));
    Ok(())
}

// Scenario S5: an older writer wounds the younger lock holder
#[test]
fn test_wound_wait_older_writer_wounds_younger_holder() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lock_manager.clone()));

    let older = tm.begin(IsolationLevel::RepeatableRead);
    let younger = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(3, 9);

    lock_manager.lock_exclusive(&younger, rid)?;

    let handle = {
        let lock_manager = lock_manager.clone();
        let older = older.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&older, rid))
    };

    // The arrival of the older writer flips the younger holder to Aborted
    wait_until("younger transaction wounded", || {
        younger.state() == TransactionState::Aborted
    });

    // Rolling back the victim hands the lock to the older transaction
    tm.abort(&younger);
    handle.join().expect("writer thread panicked")?;
    assert!(older.is_exclusive_locked(rid));
    assert_eq!(older.state(), TransactionState::Growing);

    tm.commit(&older)?;
    Ok(())
}

#[test]
fn test_wounded_waiter_surfaces_deadlock() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lock_manager.clone()));

    let t0 = tm.begin(IsolationLevel::RepeatableRead);
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(5, 5);

    lock_manager.lock_exclusive(&t1, rid)?;

    // t2 queues up behind t1
    let waiter = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t2, rid))
    };
    thread::sleep(Duration::from_millis(100));

    // The oldest transaction arrives and wounds both younger ones
    let oldest = {
        let lock_manager = lock_manager.clone();
        let t0 = t0.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t0, rid))
    };

    // The wounded waiter leaves the queue with a deadlock error
    assert_eq!(
        waiter.join().expect("waiter thread panicked"),
        Err(LockError::Deadlock(t2.id()))
    );

    wait_until("holder wounded", || t1.state() == TransactionState::Aborted);
    tm.abort(&t1);
    oldest.join().expect("oldest thread panicked")?;
    assert!(t0.is_exclusive_locked(rid));

    tm.commit(&t0)?;
    Ok(())
}

// Scenario S6: READ_COMMITTED releases shared locks between tuples and never
// enters the shrinking phase
#[test]
fn test_read_committed_lock_lifetime() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = TransactionManager::new(lock_manager.clone());

    let txn = tm.begin(IsolationLevel::ReadCommitted);
    for slot in 0..5u32 {
        let rid = Rid::new(9, slot);
        lock_manager.lock_shared(&txn, rid)?;
        assert_eq!(txn.shared_lock_count(), 1);
        lock_manager.unlock(&txn, rid)?;
        assert_eq!(txn.shared_lock_count(), 0, "lock set must be empty between tuples");
        assert_eq!(txn.state(), TransactionState::Growing);
    }

    tm.commit(&txn)?;
    Ok(())
}

#[test]
fn test_repeatable_read_unlock_starts_shrinking() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = TransactionManager::new(lock_manager.clone());

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(2, 2);

    lock_manager.lock_shared(&txn, rid)?;
    lock_manager.unlock(&txn, rid)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    // Any lock request while shrinking aborts the transaction
    assert_eq!(
        lock_manager.lock_shared(&txn, Rid::new(2, 3)),
        Err(LockError::LockOnShrinking(txn.id()))
    );
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_lock_shared_rejected_under_read_uncommitted() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = TransactionManager::new(lock_manager.clone());

    let txn = tm.begin(IsolationLevel::ReadUncommitted);
    assert_eq!(
        lock_manager.lock_shared(&txn, Rid::new(1, 1)),
        Err(LockError::SharedOnReadUncommitted(txn.id()))
    );
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_unlock_of_unheld_lock_aborts() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = TransactionManager::new(lock_manager.clone());

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert_eq!(
        lock_manager.unlock(&txn, Rid::new(1, 1)),
        Err(LockError::UnlockOnShrinking(txn.id()))
    );
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_upgrade_shared_to_exclusive() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = TransactionManager::new(lock_manager.clone());

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(4, 4);

    lock_manager.lock_shared(&txn, rid)?;
    lock_manager.lock_upgrade(&txn, rid)?;
    assert!(txn.is_exclusive_locked(rid));
    assert!(!txn.is_shared_locked(rid));
    // The upgrading transaction stays in its growing phase
    assert_eq!(txn.state(), TransactionState::Growing);

    tm.commit(&txn)?;
    Ok(())
}

#[test]
fn test_upgrade_without_shared_lock_fails() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = TransactionManager::new(lock_manager.clone());

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert_eq!(
        lock_manager.lock_upgrade(&txn, Rid::new(1, 1)),
        Err(LockError::UpgradeConflict(txn.id()))
    );
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_concurrent_upgrades_conflict() -> Result<()> {
    let lock_manager = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lock_manager.clone()));

    let t0 = tm.begin(IsolationLevel::RepeatableRead);
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(6, 6);

    lock_manager.lock_shared(&t0, rid)?;
    lock_manager.lock_shared(&t1, rid)?;

    // t0's upgrade wounds t1 and then waits for t1's shared lock to go away
    let upgrader = {
        let lock_manager = lock_manager.clone();
        let t0 = t0.clone();
        thread::spawn(move || lock_manager.lock_upgrade(&t0, rid))
    };
    wait_until("second reader wounded", || t1.state() == TransactionState::Aborted);

    // A second upgrade on the same RID loses the conflict
    assert_eq!(lock_manager.lock_upgrade(&t1, rid), Err(LockError::UpgradeConflict(t1.id())));

    tm.abort(&t1);
    upgrader.join().expect("upgrader thread panicked")?;
    assert!(t0.is_exclusive_locked(rid));

    tm.commit(&t0)?;
    Ok(())
}
