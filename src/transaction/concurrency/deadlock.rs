use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, LockRequestQueue};
use crate::transaction::concurrency::transaction::{AbortReason, TransactionState};
use crate::transaction::concurrency::transaction_manager::TransactionManager;

/// Background waits-for deadlock detection.
///
/// Every `interval` the detector rebuilds the waits-for graph from the live
/// lock queues, searches it for a cycle, and aborts the youngest (highest
/// id) transaction in the first cycle found. Queue scans run under the
/// per-queue latch, serializing with grants.
pub struct DeadlockDetector {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlockDetector {
    pub fn spawn(
        lock_manager: Arc<LockManager>,
        txn_manager: Arc<TransactionManager>,
        interval: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                thread::sleep(interval);
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                let graph = build_waits_for(&lock_manager, &txn_manager);
                if let Some(victim) = find_victim(&graph) {
                    debug!(
                        "deadlock cycle detected, aborting txn {} ({})",
                        victim,
                        AbortReason::Deadlock
                    );
                    if let Some(txn) = txn_manager.get(victim) {
                        txn_manager.abort(&txn);
                    }
                }
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Stop the detector and join its thread. Takes effect after the
    /// current sleep tick.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Edge set of the waits-for graph: waiter → holder for every ungranted /
/// granted request pair on the same queue, skipping aborted transactions.
pub(crate) fn build_waits_for(
    lock_manager: &LockManager,
    txn_manager: &TransactionManager,
) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
    let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();

    let is_live = |txn_id: TxnId| {
        txn_manager
            .get(txn_id)
            .is_some_and(|txn| txn.state() != TransactionState::Aborted)
    };
    let mut scan_queue = |queue: &LockRequestQueue| {
        let inner = queue.inner.lock();
        let mut holders: Vec<TxnId> = Vec::new();
        let mut waiters: Vec<TxnId> = Vec::new();
        for request in inner.requests.iter() {
            if request.granted {
                holders.push(request.txn_id);
            } else {
                waiters.push(request.txn_id);
            }
        }
        drop(inner);
        for &waiter in &waiters {
            if !is_live(waiter) {
                continue;
            }
            for &holder in &holders {
                if waiter != holder && is_live(holder) {
                    graph.entry(waiter).or_default().insert(holder);
                }
            }
        }
    };

    {
        let tables = lock_manager.table_lock_map.lock();
        for queue in tables.values() {
            scan_queue(queue);
        }
    }
    {
        let rows = lock_manager.row_lock_map.lock();
        for queue in rows.values() {
            scan_queue(queue);
        }
    }

    graph
}

/// DFS from every vertex in ascending id order, neighbors ascending; the
/// first cycle found elects its highest transaction id as the victim.
/// Deterministic for a given graph.
pub(crate) fn find_victim(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
    let mut visited: HashSet<TxnId> = HashSet::new();

    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path: Vec<TxnId> = Vec::new();
        if let Some(victim) = dfs(start, graph, &mut visited, &mut path) {
            return Some(victim);
        }
    }
    None
}

fn dfs(
    vertex: TxnId,
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    visited: &mut HashSet<TxnId>,
    path: &mut Vec<TxnId>,
) -> Option<TxnId> {
    if let Some(pos) = path.iter().position(|&v| v == vertex) {
        // Cycle: everything from the first occurrence onward
        return path[pos..].iter().copied().max();
    }
    if !visited.insert(vertex) {
        return None;
    }
    path.push(vertex);
    if let Some(neighbors) = graph.get(&vertex) {
        for &next in neighbors {
            if let Some(victim) = dfs(next, graph, visited, path) {
                return Some(victim);
            }
        }
    }
    path.pop();
    None
}
