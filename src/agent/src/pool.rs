// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The per-task-type worker pool.
//!
//! Each pool owns a fixed set of worker threads looping on "pop the next
//! task, execute it, report the result". The pool count is set at
//! construction and never changes. Execution happens outside the queue
//! lock, so a long-running task never blocks submission or other workers.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use quarry_agent_types::{
    BackendAddr, FinishTaskRequest, TaskPriority, TaskRequest, TaskType,
};

use crate::config::AgentConfig;
use crate::handler::{handler_for, TaskHandler};
use crate::master::{finish_task_with_retry, MasterClient};
use crate::queue::TaskQueue;
use crate::registry::TaskRegistry;
use crate::report::ReportVersion;
use crate::storage::StorageExecutor;
use crate::transfer::FileTransfer;

struct PoolShared {
    task_type: TaskType,
    worker_count: usize,
    backend: BackendAddr,
    finish_max_tries: usize,
    queue: TaskQueue,
    registry: Arc<TaskRegistry>,
    master: Arc<dyn MasterClient>,
    handler: Box<dyn TaskHandler>,
    report_version: Arc<ReportVersion>,
}

/// A fixed-size group of worker threads for one task type.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("task_type", &self.shared.task_type)
            .field("worker_count", &self.shared.worker_count)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool for `task_type`. No threads run until
    /// [`WorkerPool::start`].
    pub fn new(
        task_type: TaskType,
        cfg: &Arc<AgentConfig>,
        registry: Arc<TaskRegistry>,
        storage: Arc<dyn StorageExecutor>,
        transfer: Arc<dyn FileTransfer>,
        master: Arc<dyn MasterClient>,
        report_version: Arc<ReportVersion>,
    ) -> WorkerPool {
        let handler = handler_for(task_type, storage, transfer, Arc::clone(cfg));
        WorkerPool {
            shared: Arc::new(PoolShared {
                task_type,
                worker_count: cfg.worker_count(task_type),
                backend: cfg.backend.clone(),
                finish_max_tries: cfg.task_finish_max_tries,
                queue: TaskQueue::new(),
                registry,
                master,
                handler,
                report_version,
            }),
            workers: Vec::new(),
        }
    }

    /// Starts the worker threads.
    pub fn start(&mut self) {
        assert!(self.workers.is_empty(), "worker pool already started");
        for i in 0..self.shared.worker_count {
            let shared = Arc::clone(&self.shared);
            let name = format!("{}-worker-{i}", self.shared.task_type);
            self.workers
                .push(quarry_ore::thread::spawn(&name, move || worker_loop(&shared)));
        }
        info!(
            task_type = %self.shared.task_type,
            workers = self.shared.worker_count,
            "worker pool started"
        );
    }

    /// Submits a task to this pool.
    ///
    /// Never blocks. A task whose signature is already in flight for this
    /// type is silently dropped: the master redelivers under network
    /// uncertainty and deduplication is the agent's half of that contract.
    pub fn submit_task(&self, task: TaskRequest) {
        let task_type = task.task_type();
        debug_assert_eq!(task_type, self.shared.task_type, "task routed to wrong pool");
        if !self
            .shared
            .registry
            .register(task_type, task.signature, &task.user)
        {
            info!(
                %task_type,
                signature = task.signature,
                "task already in flight, dropping duplicate submission"
            );
            return;
        }
        let signature = task.signature;
        self.shared.queue.push(task);
        debug!(
            %task_type,
            signature,
            queued = self.shared.queue.len(),
            "task submitted"
        );
    }

    /// Number of tasks waiting in this pool's queue.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stops accepting blocking pops and joins the workers once the queue
    /// is drained.
    pub fn shutdown(&mut self) {
        self.shared.queue.shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(task_type = %self.shared.task_type, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    // Pools with a single thread drain strictly oldest-first; larger pools
    // ask for high-priority tasks ahead of the line.
    let want = (shared.worker_count > 1).then_some(TaskPriority::High);
    while let Some(task) = shared.queue.pop(want) {
        let task_type = task.task_type();
        let signature = task.signature;
        debug!(%task_type, signature, "worker picked up task");

        let outcome = shared.handler.execute(&task);

        // Release the dedup slot and the running count no matter how
        // execution went; this is the release half of the
        // at-most-one-in-flight invariant.
        shared.registry.release(task_type, signature, &task.user);

        if outcome.status.is_ok() {
            info!(%task_type, signature, "task finished");
        } else {
            warn!(
                %task_type,
                signature,
                errors = ?outcome.status.error_msgs,
                "task failed"
            );
        }

        let finish = FinishTaskRequest {
            backend: shared.backend.clone(),
            task_type,
            signature,
            status: outcome.status,
            report_version: shared.report_version.current(),
            finish_tablet_infos: outcome.finish_tablet_infos,
            snapshot_path: outcome.snapshot_path,
            split_keys: outcome.split_keys,
            checked_version: outcome.checked_version,
            checked_version_hash: outcome.checked_version_hash,
        };
        finish_task_with_retry(&*shared.master, shared.finish_max_tries, &finish);
    }
    debug!(task_type = %shared.task_type, "worker exiting");
}
