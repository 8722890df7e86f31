// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Agent configuration.
//!
//! Every retry bound, timeout, interval and worker count lives here as a
//! named field rather than a hardwired literal, so tests can shrink them.

use std::collections::BTreeMap;
use std::time::Duration;

use quarry_agent_types::{BackendAddr, MasterInfo, TaskType};

/// URL path-and-query prefix for tablet file download on a peer backend.
/// The remote file path is appended directly.
pub const DOWNLOAD_URL_PREFIX: &str = "/api/_tablet/_download?file=";

/// Configuration for the agent's worker pools, reporters and clients.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// This backend's own address, stamped on every report.
    pub backend: BackendAddr,
    /// The master this backend reports to.
    pub master: MasterInfo,
    /// Worker threads per task type. Types absent from the map fall back to
    /// [`AgentConfig::default_worker_count`].
    pub worker_counts: BTreeMap<TaskType, usize>,
    /// Worker threads for task types without an explicit entry.
    pub default_worker_count: usize,
    /// Total attempts for a finish-task RPC before the task is abandoned
    /// locally.
    pub task_finish_max_tries: usize,
    /// Total attempts for each periodic report RPC.
    pub report_max_tries: usize,
    /// Total attempts for each remote file download during a clone.
    pub download_file_max_tries: usize,
    /// Total attempts for applying a push before it is terminal.
    pub push_max_tries: usize,
    /// Bound on listing remote files from a clone source.
    pub list_remote_file_timeout: Duration,
    /// How often the worker polls an in-progress alter tablet.
    pub alter_status_poll_interval: Duration,
    /// Interval between task inventory reports.
    pub report_task_interval: Duration,
    /// Interval between disk state reports.
    pub report_disk_interval: Duration,
    /// Interval between tablet inventory reports.
    pub report_tablet_interval: Duration,
    /// Download URL prefix on peer backends.
    pub download_url_prefix: String,
}

impl AgentConfig {
    /// Creates a configuration with production defaults for the given
    /// backend and master.
    pub fn new(backend: BackendAddr, master: MasterInfo) -> AgentConfig {
        AgentConfig {
            backend,
            master,
            worker_counts: BTreeMap::new(),
            default_worker_count: 3,
            task_finish_max_tries: 3,
            report_max_tries: 3,
            download_file_max_tries: 3,
            push_max_tries: 2,
            list_remote_file_timeout: Duration::from_secs(15),
            alter_status_poll_interval: Duration::from_secs(10),
            report_task_interval: Duration::from_secs(10),
            report_disk_interval: Duration::from_secs(60),
            report_tablet_interval: Duration::from_secs(60),
            download_url_prefix: DOWNLOAD_URL_PREFIX.into(),
        }
    }

    /// Worker threads for `task_type`.
    pub fn worker_count(&self, task_type: TaskType) -> usize {
        self.worker_counts
            .get(&task_type)
            .copied()
            .unwrap_or(self.default_worker_count)
    }
}
