use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use opaldb::common::types::Rid;
use opaldb::transaction::concurrency::{
    AbortReason, DeadlockDetector, IsolationLevel, LockManager, LockMode, TransactionManager,
    TransactionState,
};

mod common;
use common::init_test_logging;

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    init_test_logging();
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    (lock_manager, txn_manager)
}

#[test]
fn test_basic_table_lock_cycle() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert!(txn.shared_table_locks().contains(&1));
    assert_eq!(txn.state(), TransactionState::Growing);

    // Re-requesting the same mode is a duplicate, not an upgrade
    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);

    assert!(lm.unlock_table(&txn, 1)?);
    assert!(txn.shared_table_locks().is_empty());
    // Under REPEATABLE_READ an S release starts the shrinking phase
    assert_eq!(txn.state(), TransactionState::Shrinking);
    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared_modes() {
    let (lm, tm) = setup();

    for mode in [
        LockMode::Shared,
        LockMode::IntentionShared,
        LockMode::SharedIntentionExclusive,
    ] {
        let txn = tm.begin(IsolationLevel::ReadUncommitted);
        let err = lm.lock_table(&txn, mode, 1).unwrap_err();
        assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}

#[test]
fn test_lock_on_shrinking() -> Result<()> {
    let (lm, tm) = setup();

    // REPEATABLE_READ: nothing may be acquired while shrinking
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::Exclusive, 1)?;
    lm.unlock_table(&txn, 1)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);
    let err = lm.lock_table(&txn, LockMode::Exclusive, 2).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);

    // READ_COMMITTED still allows IS/S while shrinking
    let txn = tm.begin(IsolationLevel::ReadCommitted);
    lm.lock_table(&txn, LockMode::Exclusive, 1)?;
    lm.unlock_table(&txn, 1)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);
    assert!(lm.lock_table(&txn, LockMode::Shared, 2)?);
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 3)?);
    let err = lm.lock_table(&txn, LockMode::Exclusive, 4).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    Ok(())
}

#[test]
fn test_row_lock_preconditions() -> Result<()> {
    let (lm, tm) = setup();
    let rid = Rid::new(4, 2);

    // Intention modes are table-only
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let err = lm
        .lock_row(&txn, LockMode::IntentionShared, 1, rid)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);

    // A row lock needs the right table lock first
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let err = lm.lock_row(&txn, LockMode::Shared, 1, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // IS covers row-S but not row-X
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::IntentionShared, 1)?;
    assert!(lm.lock_row(&txn, LockMode::Shared, 1, rid)?);
    let err = lm.lock_row(&txn, LockMode::Exclusive, 1, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // IX covers row-X
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?;
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?);
    assert!(txn
        .exclusive_row_locks()
        .get(&1)
        .is_some_and(|rids| rids.contains(&rid)));
    Ok(())
}

#[test]
fn test_unlock_errors() -> Result<()> {
    let (lm, tm) = setup();
    let rid = Rid::new(4, 2);

    // Unlocking something never locked
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let err = lm.unlock_table(&txn, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);

    // Table unlock while row locks are still held under it
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?;
    lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?;
    let err = lm.unlock_table(&txn, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableUnlockedBeforeUnlockingRows);

    // Rows first, then the table
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::IntentionExclusive, 2)?;
    lm.lock_row(&txn, LockMode::Exclusive, 2, rid)?;
    assert!(lm.unlock_row(&txn, 2, rid, false)?);
    assert!(lm.unlock_table(&txn, 2)?);
    Ok(())
}

#[test]
fn test_forced_row_unlock_skips_2pl_transition() -> Result<()> {
    let (lm, tm) = setup();
    let rid = Rid::new(4, 2);

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?;
    lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?;

    lm.unlock_row(&txn, 1, rid, true)?;
    assert_eq!(txn.state(), TransactionState::Growing);

    lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?;
    lm.unlock_row(&txn, 1, rid, false)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);
    Ok(())
}

#[test]
fn test_incompatible_upgrade() -> Result<()> {
    let (lm, tm) = setup();

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::Exclusive, 1)?;
    let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_uncontended_upgrade_replaces_the_lock() -> Result<()> {
    let (lm, tm) = setup();

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::Shared, 1)?;
    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1)?);

    assert!(txn.shared_table_locks().is_empty());
    assert!(txn.exclusive_table_locks().contains(&1));
    Ok(())
}

#[test]
fn test_contended_upgrade_waits_for_peer() -> Result<()> {
    let (lm, tm) = setup();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Shared, 1)?;
    lm.lock_table(&t2, LockMode::Shared, 1)?;

    // T1's upgrade must wait until T2 releases its shared lock
    let upgrade = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, 1))
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!upgrade.is_finished());

    lm.unlock_table(&t2, 1)?;
    let granted = upgrade.join().expect("upgrade thread panicked")?;
    assert!(granted);
    assert!(t1.shared_table_locks().is_empty());
    assert!(t1.exclusive_table_locks().contains(&1));
    Ok(())
}

#[test]
fn test_second_upgrade_on_same_resource_conflicts() -> Result<()> {
    let (lm, tm) = setup();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Shared, 1)?;
    lm.lock_table(&t2, LockMode::Shared, 1)?;

    // T1's upgrade parks behind T2's shared lock with the queue's upgrade
    // slot taken
    let upgrade = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, 1))
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!upgrade.is_finished());

    // Only one transaction may be mid-upgrade on a resource
    let err = lm
        .lock_table(&t2, LockMode::SharedIntentionExclusive, 1)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Rolling the conflicting holder back lets the first upgrade through
    tm.abort(&t2);
    let granted = upgrade.join().expect("upgrade thread panicked")?;
    assert!(granted);
    assert!(t1.shared_table_locks().is_empty());
    assert!(t1.exclusive_table_locks().contains(&1));
    Ok(())
}

#[test]
fn test_exclusive_blocks_until_released() -> Result<()> {
    let (lm, tm) = setup();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Exclusive, 1)?;

    let waiter = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Shared, 1))
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished());

    lm.unlock_table(&t1, 1)?;
    assert!(waiter.join().expect("waiter thread panicked")?);
    assert!(t2.shared_table_locks().contains(&1));
    Ok(())
}

#[test]
fn test_commit_releases_locks_and_wakes_waiters() -> Result<()> {
    let (lm, tm) = setup();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Exclusive, 1)?;

    let waiter = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, 1))
    };

    thread::sleep(Duration::from_millis(50));
    tm.commit(&t1);

    assert!(waiter.join().expect("waiter thread panicked")?);
    assert_eq!(t1.state(), TransactionState::Committed);
    assert!(t1.exclusive_table_locks().is_empty());
    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_youngest() -> Result<()> {
    let (lm, tm) = setup();
    let mut detector =
        DeadlockDetector::spawn(lm.clone(), tm.clone(), Duration::from_millis(50));

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Exclusive, 1)?;
    lm.lock_table(&t2, LockMode::Exclusive, 2)?;

    // T1 wants T2's table and vice versa
    let h1 = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, 2))
    };
    let h2 = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, 1))
    };

    // The victim is the youngest transaction in the cycle: T2
    let r1 = h1.join().expect("t1 thread panicked")?;
    let r2 = h2.join().expect("t2 thread panicked")?;
    assert!(r1, "the survivor acquires the lock");
    assert!(!r2, "the victim backs out of its wait");
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert_eq!(t1.state(), TransactionState::Growing);

    detector.shutdown();
    Ok(())
}

#[test]
fn test_waits_for_batching_is_fifo() -> Result<()> {
    let (lm, tm) = setup();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Exclusive, 1)?;

    // Queue: [X(t1) granted, X(t2), S(t3)] — t3 must not jump past t2
    let h2 = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, 1))
    };
    thread::sleep(Duration::from_millis(50));
    let h3 = {
        let lm = lm.clone();
        let t3 = t3.clone();
        thread::spawn(move || lm.lock_table(&t3, LockMode::Shared, 1))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!h2.is_finished());
    assert!(!h3.is_finished());

    lm.unlock_table(&t1, 1)?;
    assert!(h2.join().expect("t2 thread panicked")?);
    // t2 now holds X; t3 keeps waiting
    thread::sleep(Duration::from_millis(50));
    assert!(!h3.is_finished());

    lm.unlock_table(&t2, 1)?;
    assert!(h3.join().expect("t3 thread panicked")?);
    Ok(())
}
