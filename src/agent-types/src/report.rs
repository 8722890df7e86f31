// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Periodic state reports pushed to the master.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::task::{BackendAddr, TabletInfo, TaskType};

/// Capacity and usage of one storage root path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStat {
    pub root_path: String,
    pub capacity_bytes: i64,
    pub available_bytes: i64,
    /// Whether the path is currently usable for new tablets.
    pub in_use: bool,
}

/// Snapshot of the tasks this backend still considers in flight, so the
/// master can reconcile unacknowledged assignments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInventoryReport {
    pub backend: BackendAddr,
    pub in_flight: BTreeMap<TaskType, Vec<i64>>,
}

/// Disk state of this backend's storage root paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskReport {
    pub backend: BackendAddr,
    pub disks: Vec<DiskStat>,
}

/// Full tablet inventory of this backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReport {
    pub backend: BackendAddr,
    /// Marks the freshness of this report relative to finish-task reports.
    pub report_version: u64,
    pub tablets: Vec<TabletInfo>,
}

/// A periodic report, one of the three kinds the agent pushes on a timer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentReport {
    Task(TaskInventoryReport),
    DiskState(DiskReport),
    Tablet(TabletReport),
}

impl AgentReport {
    /// A short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentReport::Task(_) => "task",
            AgentReport::DiskState(_) => "disk_state",
            AgentReport::Tablet(_) => "tablet",
        }
    }
}
