use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, MutexGuard, RwLock};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase-locking transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was transitioned to `Aborted` by the lock manager
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,
    #[error("lock requested while shrinking")]
    LockOnShrinking,
    #[error("unlock attempted but no lock is held")]
    AttemptedUnlockButNoLockHeld,
    #[error("table unlocked before unlocking its rows")]
    TableUnlockedBeforeUnlockingRows,
    #[error("intention lock attempted on a row")]
    AttemptedIntentionLockOnRow,
    #[error("incompatible lock upgrade")]
    IncompatibleUpgrade,
    #[error("another upgrade is already in progress")]
    UpgradeConflict,
    #[error("row lock without an appropriate table lock")]
    TableLockNotPresent,
    #[error("chosen as deadlock victim")]
    Deadlock,
}

/// Raised by every lock-manager precondition violation. The transaction has
/// already been transitioned to `Aborted`; the enclosing executor is
/// expected to roll it back.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// An active database transaction.
///
/// Carries the 2PL state plus bookkeeping for every lock currently held:
/// one set per table lock mode, and per-table row sets for shared and
/// exclusive row locks. The lock manager maintains the bookkeeping; other
/// components only read it.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,

    shared_table_locks: Mutex<HashSet<TableOid>>,
    exclusive_table_locks: Mutex<HashSet<TableOid>>,
    intention_shared_table_locks: Mutex<HashSet<TableOid>>,
    intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,
    shared_intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,

    shared_row_locks: Mutex<HashMap<TableOid, HashSet<Rid>>>,
    exclusive_row_locks: Mutex<HashMap<TableOid, HashSet<Rid>>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_table_locks: Mutex::new(HashSet::new()),
            exclusive_table_locks: Mutex::new(HashSet::new()),
            intention_shared_table_locks: Mutex::new(HashSet::new()),
            intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_row_locks: Mutex::new(HashMap::new()),
            exclusive_row_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub fn shared_table_locks(&self) -> MutexGuard<'_, HashSet<TableOid>> {
        self.shared_table_locks.lock()
    }

    pub fn exclusive_table_locks(&self) -> MutexGuard<'_, HashSet<TableOid>> {
        self.exclusive_table_locks.lock()
    }

    pub fn intention_shared_table_locks(&self) -> MutexGuard<'_, HashSet<TableOid>> {
        self.intention_shared_table_locks.lock()
    }

    pub fn intention_exclusive_table_locks(&self) -> MutexGuard<'_, HashSet<TableOid>> {
        self.intention_exclusive_table_locks.lock()
    }

    pub fn shared_intention_exclusive_table_locks(&self) -> MutexGuard<'_, HashSet<TableOid>> {
        self.shared_intention_exclusive_table_locks.lock()
    }

    pub fn shared_row_locks(&self) -> MutexGuard<'_, HashMap<TableOid, HashSet<Rid>>> {
        self.shared_row_locks.lock()
    }

    pub fn exclusive_row_locks(&self) -> MutexGuard<'_, HashMap<TableOid, HashSet<Rid>>> {
        self.exclusive_row_locks.lock()
    }

    /// Whether any row lock under `oid` is still held.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        self.shared_row_locks
            .lock()
            .get(&oid)
            .is_some_and(|rids| !rids.is_empty())
            || self
                .exclusive_row_locks
                .lock()
                .get(&oid)
                .is_some_and(|rids| !rids.is_empty())
    }
}
