// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Task worker pool for the Quarry backend node.
//!
//! The master assigns tasks (create/drop tablet, push, clone, alter, ...)
//! to backend nodes; this crate queues and executes them with bounded
//! concurrency per task type, suppresses duplicate deliveries, accounts
//! per-user load, and reports outcomes and periodic state back to the
//! master.
//!
//! The storage engine, the RPC transport and the HTTP stack are external
//! collaborators behind the [`StorageExecutor`], [`MasterClient`] and
//! [`FileTransfer`] traits.

use std::collections::BTreeMap;
use std::sync::Arc;

use quarry_agent_types::{TaskRequest, TaskType};
use tracing::warn;

pub mod config;
pub mod handler;
pub mod master;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod report;
pub mod storage;
pub mod transfer;

pub use config::AgentConfig;
pub use master::{MasterClient, MasterError};
pub use pool::WorkerPool;
pub use registry::TaskRegistry;
pub use report::ReportVersion;
pub use storage::{AlterTabletStatus, StorageError, StorageExecutor};
pub use transfer::{FileTransfer, HttpFileTransfer, TransferError};

use report::{ReportKind, Reporter, ShutdownFlag};

/// The assembled agent: one worker pool per task type plus the three
/// reporter threads, all sharing one registry and one report version.
pub struct Agent {
    cfg: Arc<AgentConfig>,
    registry: Arc<TaskRegistry>,
    report_version: Arc<ReportVersion>,
    storage: Arc<dyn StorageExecutor>,
    master: Arc<dyn MasterClient>,
    pools: BTreeMap<TaskType, WorkerPool>,
    reporters: Vec<Reporter>,
    shutdown_flag: Arc<ShutdownFlag>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("backend", &self.cfg.backend)
            .field("pools", &self.pools.len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent wired to the given collaborators. Nothing runs
    /// until [`Agent::start`].
    pub fn new(
        cfg: AgentConfig,
        storage: Arc<dyn StorageExecutor>,
        master: Arc<dyn MasterClient>,
        transfer: Arc<dyn FileTransfer>,
    ) -> Agent {
        let cfg = Arc::new(cfg);
        let registry = Arc::new(TaskRegistry::new());
        let report_version = Arc::new(ReportVersion::new());
        let pools = TaskType::ALL
            .into_iter()
            .map(|task_type| {
                let pool = WorkerPool::new(
                    task_type,
                    &cfg,
                    Arc::clone(&registry),
                    Arc::clone(&storage),
                    Arc::clone(&transfer),
                    Arc::clone(&master),
                    Arc::clone(&report_version),
                );
                (task_type, pool)
            })
            .collect();
        Agent {
            cfg,
            registry,
            report_version,
            storage,
            master,
            pools,
            reporters: Vec::new(),
            shutdown_flag: Arc::new(ShutdownFlag::new()),
        }
    }

    /// Starts every worker pool and reporter.
    pub fn start(&mut self) {
        for pool in self.pools.values_mut() {
            pool.start();
        }
        for kind in [ReportKind::Task, ReportKind::DiskState, ReportKind::Tablet] {
            self.reporters.push(Reporter::spawn(
                kind,
                Arc::clone(&self.cfg),
                Arc::clone(&self.registry),
                Arc::clone(&self.storage),
                Arc::clone(&self.master),
                Arc::clone(&self.report_version),
                Arc::clone(&self.shutdown_flag),
            ));
        }
    }

    /// Routes a task to its type's pool.
    ///
    /// Fire and forget: duplicates are silently dropped and failures are
    /// reported to the master, never to the caller.
    pub fn submit_task(&self, task: TaskRequest) {
        match self.pools.get(&task.task_type()) {
            Some(pool) => pool.submit_task(task),
            None => {
                // Unreachable as long as `new` builds a pool per type.
                warn!(task_type = %task.task_type(), "no pool for task type");
            }
        }
    }

    /// The shared dedup/accounting registry.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// The current report version.
    pub fn report_version(&self) -> u64 {
        self.report_version.current()
    }

    /// Drains the queues, stops all workers and reporters, and joins them.
    pub fn shutdown(&mut self) {
        self.shutdown_flag.signal();
        for pool in self.pools.values_mut() {
            pool.shutdown();
        }
        for reporter in self.reporters.drain(..) {
            reporter.join();
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}
