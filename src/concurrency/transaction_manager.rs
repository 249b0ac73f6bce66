use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::transaction::{IsolationLevel, Transaction, TransactionError, TransactionState};

/// Creates and tracks transactions, and pairs the two-phase-locking
/// protocol's bookends: every commit or abort releases all locks the
/// transaction still holds.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction; IDs are handed out in arrival order, so a
    /// smaller ID always marks an older transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit: release every held lock, then mark the transaction committed.
    /// A wounded (already aborted) transaction cannot commit.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        let was_aborted = txn.state() == TransactionState::Aborted;
        self.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        if was_aborted {
            return Err(TransactionError::InvalidState(txn.id()));
        }
        txn.set_state(TransactionState::Committed);
        Ok(())
    }

    /// Abort: release every held lock and mark the transaction aborted
    pub fn abort(&self, txn: &Arc<Transaction>) {
        self.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        txn.set_state(TransactionState::Aborted);
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.exclusive_lock_rids() {
            let _ = self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.shared_lock_rids() {
            let _ = self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let a = tm.begin(IsolationLevel::ReadCommitted);
        let b = tm.begin(IsolationLevel::RepeatableRead);
        assert!(a.id() < b.id());
        assert_eq!(tm.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_removes_from_active_set() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let txn = tm.begin(IsolationLevel::ReadCommitted);
        assert!(tm.get_transaction(txn.id()).is_some());

        tm.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(tm.get_transaction(txn.id()).is_none());
    }

    #[test]
    fn test_aborted_transaction_cannot_commit() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let txn = tm.begin(IsolationLevel::ReadCommitted);
        txn.set_state(TransactionState::Aborted);
        assert!(tm.commit(&txn).is_err());
    }

    #[test]
    fn test_abort_releases_locks() {
        let lock_manager = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lock_manager.clone());
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let rid = crate::common::types::Rid::new(1, 1);

        lock_manager.lock_exclusive(&txn, rid).unwrap();
        assert!(txn.is_exclusive_locked(rid));

        tm.abort(&txn);
        assert!(!txn.is_exclusive_locked(rid));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
