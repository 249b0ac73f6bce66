use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LockError {
    #[error("Transaction {0} requested a lock while shrinking")]
    LockOnShrinking(TxnId),

    #[error("Transaction {0} requested a shared lock under READ_UNCOMMITTED")]
    SharedOnReadUncommitted(TxnId),

    #[error("Transaction {0} lost an upgrade conflict")]
    UpgradeConflict(TxnId),

    #[error("Transaction {0} was aborted as a deadlock victim")]
    Deadlock(TxnId),

    #[error("Transaction {0} released a lock it does not hold")]
    UnlockOnShrinking(TxnId),
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    txn: Arc<Transaction>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<LockRequest>,
    /// Number of granted shared requests in the queue
    reader_count: u32,
    /// Transaction currently upgrading S -> X on this RID, if any
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

/// Tuple-level two-phase-locking lock manager with wound-wait deadlock
/// avoidance: an arriving request aborts every *younger* conflicting request
/// in the queue, so waits-for cycles cannot form. Aborted waiters discover
/// their fate on wake-up, splice themselves out, and surface `Deadlock`.
///
/// Grants are FIFO per queue, modulo wound-wait interventions: a shared
/// request joins the current readers whenever no exclusive lock is held.
pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Clone out the queue for `rid`, creating it on first use. The table
    /// latch is held only for the lookup, never across a wait.
    fn queue_for(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut table = self.lock_table.lock();
        table.entry(rid).or_default().clone()
    }

    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::LockOnShrinking(txn.id()));
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::SharedOnReadUncommitted(txn.id()));
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();

        // Wound pass: a shared request conflicts with exclusive entries only
        let mut wounded = false;
        for request in state.queue.iter() {
            if request.mode == LockMode::Exclusive && request.txn_id > txn.id() {
                debug!("txn {} wounds younger txn {} on rid {}", txn.id(), request.txn_id, rid);
                request.txn.set_state(TransactionState::Aborted);
                wounded = true;
            }
        }
        if wounded {
            queue.cv.notify_all();
        }

        state.queue.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
            txn: txn.clone(),
        });

        // A reader waits only while an exclusive request heads the queue and
        // nobody reads yet
        while txn.state() != TransactionState::Aborted
            && state.queue.front().map(|r| r.mode) == Some(LockMode::Exclusive)
            && state.reader_count == 0
        {
            queue.cv.wait(&mut state);
        }

        if txn.state() == TransactionState::Aborted {
            Self::remove_request(&mut state, txn.id());
            queue.cv.notify_all();
            return Err(LockError::Deadlock(txn.id()));
        }

        if let Some(request) = state.queue.iter_mut().find(|r| r.txn_id == txn.id()) {
            request.granted = true;
        }
        state.reader_count += 1;
        drop(state);

        txn.add_shared_lock(rid);
        Ok(())
    }

    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::LockOnShrinking(txn.id()));
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();

        // Wound pass: an exclusive request conflicts with every entry
        let mut wounded = false;
        for request in state.queue.iter() {
            if request.txn_id > txn.id() {
                debug!("txn {} wounds younger txn {} on rid {}", txn.id(), request.txn_id, rid);
                request.txn.set_state(TransactionState::Aborted);
                wounded = true;
            }
        }
        if wounded {
            queue.cv.notify_all();
        }

        state.queue.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
            txn: txn.clone(),
        });

        // A writer waits until it heads the queue and the readers are gone
        while txn.state() != TransactionState::Aborted
            && (state.queue.front().map(|r| r.txn_id) != Some(txn.id()) || state.reader_count > 0)
        {
            queue.cv.wait(&mut state);
        }

        if txn.state() == TransactionState::Aborted {
            Self::remove_request(&mut state, txn.id());
            queue.cv.notify_all();
            return Err(LockError::Deadlock(txn.id()));
        }

        if let Some(request) = state.queue.front_mut() {
            request.granted = true;
        }
        drop(state);

        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be in
    /// flight per RID.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        if !txn.is_shared_locked(rid) {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::UpgradeConflict(txn.id()));
        }

        let queue = self.queue_for(rid);
        {
            let mut state = queue.state.lock();
            if state.upgrading.is_some() {
                drop(state);
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::UpgradeConflict(txn.id()));
            }
            state.upgrading = Some(txn.id());
        }

        let result = self
            .unlock(txn, rid)
            .and_then(|_| self.lock_exclusive(txn, rid));

        let mut state = queue.state.lock();
        if state.upgrading == Some(txn.id()) {
            state.upgrading = None;
        }
        result
    }

    /// Release a held lock. Under REPEATABLE_READ the first unlock of a
    /// growing, non-upgrading transaction moves it to the shrinking phase.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();

        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
            && state.upgrading != Some(txn.id())
        {
            txn.set_state(TransactionState::Shrinking);
        }

        Self::remove_request(&mut state, txn.id());
        queue.cv.notify_all();
        drop(state);

        if txn.is_exclusive_locked(rid) {
            txn.remove_exclusive_lock(rid);
        } else if txn.is_shared_locked(rid) {
            txn.remove_shared_lock(rid);
        } else {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::UnlockOnShrinking(txn.id()));
        }

        Ok(())
    }

    /// Splice a transaction's request out of the queue, fixing the granted
    /// reader count when it held a shared lock
    fn remove_request(state: &mut QueueState, txn_id: TxnId) {
        if let Some(pos) = state.queue.iter().position(|r| r.txn_id == txn_id) {
            let request = state.queue.remove(pos).expect("position came from the same queue");
            if request.mode == LockMode::Shared && request.granted {
                state.reader_count -= 1;
            }
        }
    }
}
