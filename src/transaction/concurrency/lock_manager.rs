use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbort, TransactionState,
};

/// Hierarchical lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// One table- or row-lock request. `rid` is set for row requests only.
#[derive(Debug, Clone)]
pub(crate) struct LockRequest {
    pub txn_id: TxnId,
    pub mode: LockMode,
    pub oid: TableOid,
    pub rid: Option<Rid>,
    pub granted: bool,
}

impl LockRequest {
    fn table(txn_id: TxnId, mode: LockMode, oid: TableOid) -> Self {
        Self {
            txn_id,
            mode,
            oid,
            rid: None,
            granted: false,
        }
    }

    fn row(txn_id: TxnId, mode: LockMode, oid: TableOid, rid: Rid) -> Self {
        Self {
            txn_id,
            mode,
            oid,
            rid: Some(rid),
            granted: false,
        }
    }
}

pub(crate) struct QueueInner {
    pub requests: VecDeque<LockRequest>,
    /// At most one transaction may be mid-upgrade on a resource
    pub upgrading: Option<TxnId>,
}

/// FIFO request queue for one lockable resource, with a condition variable
/// for grant wakeups.
pub(crate) struct LockRequestQueue {
    pub inner: Mutex<QueueInner>,
    pub cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Hierarchical lock manager enforcing strict two-phase locking over
/// table- and row-granularity locks.
///
/// Lock-internal ordering: a map mutex is always taken before a queue
/// mutex, never the reverse.
pub struct LockManager {
    pub(crate) table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    pub(crate) row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
        }
    }

    /// Rows = held, columns = requested. Symmetric.
    pub fn are_locks_compatible(l1: LockMode, l2: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (l1, l2),
            (IntentionShared, IntentionShared | IntentionExclusive | Shared | SharedIntentionExclusive)
                | (IntentionExclusive, IntentionShared | IntentionExclusive)
                | (Shared, IntentionShared | Shared)
                | (SharedIntentionExclusive, IntentionShared)
        )
    }

    /// The upgrade lattice: which held mode may be replaced by which
    /// stronger mode.
    pub fn can_lock_upgrade(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (held, requested),
            (IntentionShared, Shared | IntentionExclusive | SharedIntentionExclusive | Exclusive)
                | (Shared, Exclusive | SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive | SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }

    /// Acquire a table lock, blocking until granted. Returns false if the
    /// transaction was aborted before or while waiting; precondition
    /// violations abort the transaction and raise.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        use LockMode::*;

        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted
            && matches!(mode, IntentionShared | Shared | SharedIntentionExclusive)
        {
            return Err(abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        if txn.state() == TransactionState::Shrinking {
            let allowed = txn.isolation_level() == IsolationLevel::ReadCommitted
                && matches!(mode, IntentionShared | Shared);
            if !allowed {
                return Err(abort(txn, AbortReason::LockOnShrinking));
            }
        }

        let queue = self.table_queue(oid);
        let mut inner = queue.inner.lock();

        // A second request by the same transaction is a duplicate or an
        // upgrade
        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id())
        {
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if !Self::can_lock_upgrade(held, mode) {
                drop(inner);
                return Err(abort(txn, AbortReason::IncompatibleUpgrade));
            }
            if inner.upgrading.is_some() {
                drop(inner);
                warn!("txn {} upgrade conflict on table {}", txn.id(), oid);
                return Err(abort(txn, AbortReason::UpgradeConflict));
            }
            let _ = inner.requests.remove(pos);
            inner.upgrading = Some(txn.id());
            erase_table_bookkeeping(txn, held, oid);
            inner.requests.push_back(LockRequest::table(txn.id(), mode, oid));
        } else {
            inner.requests.push_back(LockRequest::table(txn.id(), mode, oid));
        }

        // Wait until granted or externally aborted
        loop {
            grant_new_locks(&mut inner);
            if inner
                .requests
                .iter()
                .any(|r| r.txn_id == txn.id() && r.granted)
            {
                break;
            }
            if txn.state() == TransactionState::Aborted {
                let txn_id = txn.id();
                inner.requests.retain(|r| r.txn_id != txn_id);
                if inner.upgrading == Some(txn_id) {
                    inner.upgrading = None;
                }
                drop(inner);
                queue.cv.notify_all();
                return Ok(false);
            }
            queue.cv.wait(&mut inner);
        }

        if inner.upgrading == Some(txn.id()) {
            inner.upgrading = None;
        }
        drop(inner);

        record_table_bookkeeping(txn, mode, oid);
        Ok(true)
    }

    /// Acquire a row lock. Intention modes are rejected, and the matching
    /// table lock must already be held.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        use LockMode::*;

        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if matches!(mode, IntentionShared | IntentionExclusive | SharedIntentionExclusive) {
            return Err(abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted && mode == Shared {
            return Err(abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        if txn.state() == TransactionState::Shrinking {
            let allowed =
                txn.isolation_level() == IsolationLevel::ReadCommitted && mode == Shared;
            if !allowed {
                return Err(abort(txn, AbortReason::LockOnShrinking));
            }
        }
        if !table_lock_present(txn, mode, oid) {
            return Err(abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = self.row_queue(rid);
        let mut inner = queue.inner.lock();

        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id())
        {
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if !Self::can_lock_upgrade(held, mode) {
                drop(inner);
                return Err(abort(txn, AbortReason::IncompatibleUpgrade));
            }
            if inner.upgrading.is_some() {
                drop(inner);
                warn!("txn {} upgrade conflict on row {}", txn.id(), rid);
                return Err(abort(txn, AbortReason::UpgradeConflict));
            }
            let _ = inner.requests.remove(pos);
            inner.upgrading = Some(txn.id());
            erase_row_bookkeeping(txn, held, oid, rid);
            inner
                .requests
                .push_back(LockRequest::row(txn.id(), mode, oid, rid));
        } else {
            inner
                .requests
                .push_back(LockRequest::row(txn.id(), mode, oid, rid));
        }

        loop {
            grant_new_locks(&mut inner);
            if inner
                .requests
                .iter()
                .any(|r| r.txn_id == txn.id() && r.granted)
            {
                break;
            }
            if txn.state() == TransactionState::Aborted {
                let txn_id = txn.id();
                inner.requests.retain(|r| r.txn_id != txn_id);
                if inner.upgrading == Some(txn_id) {
                    inner.upgrading = None;
                }
                drop(inner);
                queue.cv.notify_all();
                return Ok(false);
            }
            queue.cv.wait(&mut inner);
        }

        if inner.upgrading == Some(txn.id()) {
            inner.upgrading = None;
        }
        drop(inner);

        record_row_bookkeeping(txn, mode, oid, rid);
        Ok(true)
    }

    /// Release a table lock, applying the strict-2PL state transition for
    /// the transaction's isolation level.
    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool, TransactionAbort> {
        let Some(queue) = self.try_table_queue(oid) else {
            return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut inner = queue.inner.lock();
        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id() && r.oid == oid)
        else {
            drop(inner);
            return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        if txn.holds_row_locks_on(oid) {
            drop(inner);
            return Err(abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mode = inner.requests[pos].mode;
        apply_unlock_transition(txn, mode);

        let _ = inner.requests.remove(pos);
        drop(inner);
        queue.cv.notify_all();

        erase_table_bookkeeping(txn, mode, oid);
        Ok(true)
    }

    /// Release a row lock. `force` skips the 2PL state transition, for use
    /// by transaction rollback.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<bool, TransactionAbort> {
        let Some(queue) = self.try_row_queue(rid) else {
            return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut inner = queue.inner.lock();
        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id() && r.rid == Some(rid))
        else {
            drop(inner);
            return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = inner.requests[pos].mode;
        if !force {
            apply_unlock_transition(txn, mode);
        }

        let _ = inner.requests.remove(pos);
        drop(inner);
        queue.cv.notify_all();

        erase_row_bookkeeping(txn, mode, oid, rid);
        Ok(true)
    }

    /// Strip every lock the transaction still holds and wake all waiters.
    /// Used by commit and abort; performs no 2PL transitions.
    pub fn release_all_locks(&self, txn: &Transaction) {
        let txn_id = txn.id();

        let row_rids: Vec<Rid> = {
            let mut shared = txn.shared_row_locks();
            let mut exclusive = txn.exclusive_row_locks();
            shared
                .drain()
                .chain(exclusive.drain())
                .flat_map(|(_, rids)| rids)
                .collect()
        };
        for rid in row_rids {
            let queue = self.row_lock_map.lock().get(&rid).cloned();
            if let Some(queue) = queue {
                let mut inner = queue.inner.lock();
                inner.requests.retain(|r| r.txn_id != txn_id);
                if inner.upgrading == Some(txn_id) {
                    inner.upgrading = None;
                }
            }
        }

        let table_oids: Vec<TableOid> = {
            let mut oids: Vec<TableOid> = Vec::new();
            oids.extend(txn.shared_table_locks().drain());
            oids.extend(txn.exclusive_table_locks().drain());
            oids.extend(txn.intention_shared_table_locks().drain());
            oids.extend(txn.intention_exclusive_table_locks().drain());
            oids.extend(txn.shared_intention_exclusive_table_locks().drain());
            oids
        };
        for oid in table_oids {
            let queue = self.table_lock_map.lock().get(&oid).cloned();
            if let Some(queue) = queue {
                let mut inner = queue.inner.lock();
                inner.requests.retain(|r| r.txn_id != txn_id);
                if inner.upgrading == Some(txn_id) {
                    inner.upgrading = None;
                }
            }
        }

        // The transaction may be parked on a queue none of the bookkeeping
        // mentions; wake everything
        for queue in self.table_lock_map.lock().values() {
            queue.cv.notify_all();
        }
        for queue in self.row_lock_map.lock().values() {
            queue.cv.notify_all();
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        map.entry(oid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn try_table_queue(&self, oid: TableOid) -> Option<Arc<LockRequestQueue>> {
        self.table_lock_map.lock().get(&oid).cloned()
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        map.entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn try_row_queue(&self, rid: Rid) -> Option<Arc<LockRequestQueue>> {
        self.row_lock_map.lock().get(&rid).cloned()
    }
}

/// Transition the transaction to Aborted and build the error to raise.
fn abort(txn: &Transaction, reason: AbortReason) -> TransactionAbort {
    txn.set_state(TransactionState::Aborted);
    TransactionAbort {
        txn_id: txn.id(),
        reason,
    }
}

/// Grant the head of the queue, then keep granting forward while each
/// request is compatible with everything granted so far. Strict FIFO with
/// batching: the first incompatible request blocks everything behind it.
pub(crate) fn grant_new_locks(inner: &mut QueueInner) {
    let mut granted_modes: Vec<LockMode> = Vec::new();
    for (i, request) in inner.requests.iter_mut().enumerate() {
        if i == 0 {
            request.granted = true;
            granted_modes.push(request.mode);
            continue;
        }
        if granted_modes
            .iter()
            .all(|&held| LockManager::are_locks_compatible(held, request.mode))
        {
            request.granted = true;
            granted_modes.push(request.mode);
        } else {
            break;
        }
    }
}

/// The table lock required before locking a row: any table lock for row-S,
/// one of {IX, SIX, X} for row-X.
fn table_lock_present(txn: &Transaction, row_mode: LockMode, oid: TableOid) -> bool {
    match row_mode {
        LockMode::Shared => {
            txn.shared_table_locks().contains(&oid)
                || txn.exclusive_table_locks().contains(&oid)
                || txn.intention_shared_table_locks().contains(&oid)
                || txn.intention_exclusive_table_locks().contains(&oid)
                || txn.shared_intention_exclusive_table_locks().contains(&oid)
        }
        LockMode::Exclusive => {
            txn.exclusive_table_locks().contains(&oid)
                || txn.intention_exclusive_table_locks().contains(&oid)
                || txn.shared_intention_exclusive_table_locks().contains(&oid)
        }
        _ => false,
    }
}

/// Strict 2PL: the first release of a significant lock moves the
/// transaction to Shrinking. Which modes are significant depends on the
/// isolation level.
fn apply_unlock_transition(txn: &Transaction, mode: LockMode) {
    let shrink = match txn.isolation_level() {
        IsolationLevel::RepeatableRead => {
            matches!(mode, LockMode::Shared | LockMode::Exclusive)
        }
        IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
            mode == LockMode::Exclusive
        }
    };
    if shrink && txn.state() == TransactionState::Growing {
        txn.set_state(TransactionState::Shrinking);
    }
}

fn record_table_bookkeeping(txn: &Transaction, mode: LockMode, oid: TableOid) {
    match mode {
        LockMode::Shared => txn.shared_table_locks().insert(oid),
        LockMode::Exclusive => txn.exclusive_table_locks().insert(oid),
        LockMode::IntentionShared => txn.intention_shared_table_locks().insert(oid),
        LockMode::IntentionExclusive => txn.intention_exclusive_table_locks().insert(oid),
        LockMode::SharedIntentionExclusive => {
            txn.shared_intention_exclusive_table_locks().insert(oid)
        }
    };
}

fn erase_table_bookkeeping(txn: &Transaction, mode: LockMode, oid: TableOid) {
    match mode {
        LockMode::Shared => txn.shared_table_locks().remove(&oid),
        LockMode::Exclusive => txn.exclusive_table_locks().remove(&oid),
        LockMode::IntentionShared => txn.intention_shared_table_locks().remove(&oid),
        LockMode::IntentionExclusive => txn.intention_exclusive_table_locks().remove(&oid),
        LockMode::SharedIntentionExclusive => {
            txn.shared_intention_exclusive_table_locks().remove(&oid)
        }
    };
}

fn record_row_bookkeeping(txn: &Transaction, mode: LockMode, oid: TableOid, rid: Rid) {
    match mode {
        LockMode::Shared => {
            txn.shared_row_locks().entry(oid).or_default().insert(rid);
        }
        LockMode::Exclusive => {
            txn.exclusive_row_locks().entry(oid).or_default().insert(rid);
        }
        _ => {}
    }
}

fn erase_row_bookkeeping(txn: &Transaction, mode: LockMode, oid: TableOid, rid: Rid) {
    let mut rows = match mode {
        LockMode::Shared => txn.shared_row_locks(),
        LockMode::Exclusive => txn.exclusive_row_locks(),
        _ => return,
    };
    if let Some(rids) = rows.get_mut(&oid) {
        rids.remove(&rid);
        if rids.is_empty() {
            rows.remove(&oid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let modes = [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ];

        // IS row of the matrix
        let expected_is = [true, true, true, true, false];
        for (m, want) in modes.iter().zip(expected_is) {
            assert_eq!(LockManager::are_locks_compatible(IntentionShared, *m), want);
        }
        // X is compatible with nothing
        for m in modes {
            assert!(!LockManager::are_locks_compatible(Exclusive, m));
            assert!(!LockManager::are_locks_compatible(m, Exclusive));
        }
        // Symmetry
        for a in modes {
            for b in modes {
                assert_eq!(
                    LockManager::are_locks_compatible(a, b),
                    LockManager::are_locks_compatible(b, a)
                );
            }
        }
    }

    #[test]
    fn test_upgrade_lattice() {
        use LockMode::*;
        assert!(LockManager::can_lock_upgrade(IntentionShared, Shared));
        assert!(LockManager::can_lock_upgrade(IntentionShared, Exclusive));
        assert!(LockManager::can_lock_upgrade(Shared, Exclusive));
        assert!(LockManager::can_lock_upgrade(Shared, SharedIntentionExclusive));
        assert!(LockManager::can_lock_upgrade(IntentionExclusive, Exclusive));
        assert!(LockManager::can_lock_upgrade(SharedIntentionExclusive, Exclusive));

        assert!(!LockManager::can_lock_upgrade(Shared, IntentionShared));
        assert!(!LockManager::can_lock_upgrade(Exclusive, Shared));
        assert!(!LockManager::can_lock_upgrade(SharedIntentionExclusive, Shared));
        assert!(!LockManager::can_lock_upgrade(Shared, Shared));
    }

    #[test]
    fn test_grant_batches_compatible_prefix() {
        use LockMode::*;
        let mut inner = QueueInner {
            requests: VecDeque::from([
                LockRequest::table(1, Shared, 1),
                LockRequest::table(2, Shared, 1),
                LockRequest::table(3, Exclusive, 1),
                LockRequest::table(4, Shared, 1),
            ]),
            upgrading: None,
        };
        grant_new_locks(&mut inner);

        let granted: Vec<bool> = inner.requests.iter().map(|r| r.granted).collect();
        // The exclusive request blocks, and FIFO fairness holds back the
        // shared request behind it
        assert_eq!(granted, vec![true, true, false, false]);
    }
}
