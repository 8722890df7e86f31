// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Duplicate-task suppression and per-user task accounting.
//!
//! One [`TaskRegistry`] is shared by every worker pool in the process, so a
//! redelivered task is rejected no matter which pool sees it first. The
//! signature set and the counters are guarded by separate locks: neither is
//! ever held across task execution or network I/O, and contention on one
//! does not serialize the other.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tracing::{debug, error};

use quarry_agent_types::TaskType;

#[derive(Debug, Default)]
struct TaskCounts {
    running_per_user: BTreeMap<TaskType, BTreeMap<String, u32>>,
    total_per_user: BTreeMap<TaskType, BTreeMap<String, u64>>,
    total: BTreeMap<TaskType, u64>,
}

/// Process-wide registry of in-flight task signatures and per-user task
/// counts.
///
/// Constructed once and shared by `Arc` with every pool; never a global.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    signatures: Mutex<BTreeMap<TaskType, BTreeSet<i64>>>,
    counts: Mutex<TaskCounts>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> TaskRegistry {
        TaskRegistry::default()
    }

    /// Attempts to register `signature` as in flight for `task_type`.
    ///
    /// Returns `false` if the signature is already registered, in which case
    /// nothing is recorded: first-seen wins and the duplicate submission
    /// must be dropped by the caller. On success the running and total
    /// counts for `(task_type, user)` are incremented.
    pub fn register(&self, task_type: TaskType, signature: i64, user: &str) -> bool {
        {
            let mut signatures = self.signatures.lock().expect("signatures lock poisoned");
            let set = signatures.entry(task_type).or_default();
            if !set.insert(signature) {
                debug!(%task_type, signature, "task already registered, dropping duplicate");
                return false;
            }
        }
        let mut counts = self.counts.lock().expect("counts lock poisoned");
        *counts
            .running_per_user
            .entry(task_type)
            .or_default()
            .entry(user.into())
            .or_insert(0) += 1;
        *counts
            .total_per_user
            .entry(task_type)
            .or_default()
            .entry(user.into())
            .or_insert(0) += 1;
        *counts.total.entry(task_type).or_insert(0) += 1;
        true
    }

    /// Releases a completed task, success or failure alike.
    ///
    /// Removes the signature and decrements the running count for
    /// `(task_type, user)`. Each release must pair with exactly one earlier
    /// successful [`TaskRegistry::register`]; a decrement below zero is a
    /// defect, not a recoverable condition.
    pub fn release(&self, task_type: TaskType, signature: i64, user: &str) {
        {
            let mut signatures = self.signatures.lock().expect("signatures lock poisoned");
            let removed = signatures
                .get_mut(&task_type)
                .is_some_and(|set| set.remove(&signature));
            debug_assert!(removed, "released task {task_type}/{signature} was not registered");
            if !removed {
                error!(%task_type, signature, "released task was not registered");
            }
        }
        let mut counts = self.counts.lock().expect("counts lock poisoned");
        match counts
            .running_per_user
            .get_mut(&task_type)
            .and_then(|by_user| by_user.get_mut(user))
        {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                debug_assert!(false, "running count underflow for {task_type}/{user}");
                error!(%task_type, user, "running count underflow");
            }
        }
    }

    /// The running count for `(task_type, user)`.
    pub fn running_count(&self, task_type: TaskType, user: &str) -> u32 {
        let counts = self.counts.lock().expect("counts lock poisoned");
        counts
            .running_per_user
            .get(&task_type)
            .and_then(|by_user| by_user.get(user))
            .copied()
            .unwrap_or(0)
    }

    /// How many tasks of `task_type` have ever been accepted.
    pub fn total_count(&self, task_type: TaskType) -> u64 {
        let counts = self.counts.lock().expect("counts lock poisoned");
        counts.total.get(&task_type).copied().unwrap_or(0)
    }

    /// Whether `signature` is currently in flight for `task_type`.
    pub fn contains(&self, task_type: TaskType, signature: i64) -> bool {
        let signatures = self.signatures.lock().expect("signatures lock poisoned");
        signatures
            .get(&task_type)
            .is_some_and(|set| set.contains(&signature))
    }

    /// Snapshot of all in-flight signatures, for the task inventory report.
    pub fn in_flight(&self) -> BTreeMap<TaskType, Vec<i64>> {
        let signatures = self.signatures.lock().expect("signatures lock poisoned");
        signatures
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(task_type, set)| (*task_type, set.iter().copied().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = TaskRegistry::new();
        assert!(registry.register(TaskType::Push, 42, "u1"));
        assert!(!registry.register(TaskType::Push, 42, "u1"));
        // One rejection leaves exactly one increment behind.
        assert_eq!(registry.running_count(TaskType::Push, "u1"), 1);
        assert_eq!(registry.total_count(TaskType::Push), 1);
    }

    #[test]
    fn same_signature_different_types_coexist() {
        let registry = TaskRegistry::new();
        assert!(registry.register(TaskType::Push, 7, "u1"));
        assert!(registry.register(TaskType::Clone, 7, "u1"));
        assert!(registry.contains(TaskType::Push, 7));
        assert!(registry.contains(TaskType::Clone, 7));
    }

    #[test]
    fn release_restores_counts() {
        let registry = TaskRegistry::new();
        registry.register(TaskType::Push, 42, "u1");
        registry.release(TaskType::Push, 42, "u1");
        assert_eq!(registry.running_count(TaskType::Push, "u1"), 0);
        assert!(!registry.contains(TaskType::Push, 42));
        // Total count is cumulative and survives release.
        assert_eq!(registry.total_count(TaskType::Push), 1);
        // The slot is free for a redelivery of the same signature.
        assert!(registry.register(TaskType::Push, 42, "u1"));
    }

    #[test]
    fn in_flight_snapshot() {
        let registry = TaskRegistry::new();
        registry.register(TaskType::Push, 1, "u1");
        registry.register(TaskType::Push, 2, "u2");
        registry.register(TaskType::Clone, 3, "u1");
        registry.release(TaskType::Push, 1, "u1");
        let in_flight = registry.in_flight();
        assert_eq!(in_flight.get(&TaskType::Push), Some(&vec![2]));
        assert_eq!(in_flight.get(&TaskType::Clone), Some(&vec![3]));
    }

    #[test]
    fn concurrent_duplicate_submission_registers_once() {
        use std::sync::Arc;

        let registry = Arc::new(TaskRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry.register(TaskType::Push, 42, "u1")
            }));
        }
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(registry.running_count(TaskType::Push, "u1"), 1);
    }
}
