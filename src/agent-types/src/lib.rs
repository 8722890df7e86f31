// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Shared types for the Quarry backend agent.
//!
//! These are the messages exchanged between a backend node and the master
//! (and between peer backends). The actual wire transport and its generated
//! schemas live elsewhere; the structs here stand in for them on the agent
//! side, so everything derives [`serde`] rather than referencing a codec.

mod report;
mod task;

pub use report::{AgentReport, DiskReport, DiskStat, TabletReport, TaskInventoryReport};
pub use task::{
    AlterTabletReq, AlterTabletType, BackendAddr, CancelDeleteDataReq, CheckConsistencyReq,
    CloneReq, CreateTabletReq, DropTabletReq, FinishTaskRequest, MasterInfo, PushReq, PushType,
    QuerySplitKeyReq, RemoteFile, RestoreReq, SchemaHash, SnapshotReq, StatusCode, StorageMedium,
    StorageMediumMigrateReq, TabletId, TabletInfo, TaskPayload, TaskPriority, TaskRequest,
    TaskStatus, TaskType, UploadReq,
};
