// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Task assignment and completion messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a tablet, a shard of a table.
pub type TabletId = i64;

/// Identifies the schema version of a tablet. A tablet is fully named by a
/// `(TabletId, SchemaHash)` pair.
pub type SchemaHash = i64;

/// The address of a backend node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendAddr {
    /// Hostname or IP.
    pub host: String,
    /// RPC port.
    pub be_port: u16,
    /// HTTP port, used for tablet file download.
    pub http_port: u16,
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.be_port)
    }
}

/// Identity of the master this backend reports to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterInfo {
    /// Master hostname or IP.
    pub host: String,
    /// Master RPC port.
    pub port: u16,
    /// Cluster the master believes this backend belongs to.
    pub cluster_id: i32,
    /// Master epoch, bumped on master failover.
    pub epoch: i64,
}

/// The category of operation an agent performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Create a tablet.
    CreateTablet,
    /// Drop a tablet.
    DropTablet,
    /// Apply a load file to a tablet.
    Push,
    /// Apply a delete predicate to a tablet (rides the push pipeline).
    Delete,
    /// Start and track a schema change or rollup.
    AlterTablet,
    /// Compute split keys for a tablet.
    QuerySplitKey,
    /// Copy a tablet from a peer backend.
    Clone,
    /// Move a tablet between storage media.
    StorageMediumMigrate,
    /// Cancel a previously issued delete.
    CancelDeleteData,
    /// Verify a tablet's checksum at a version.
    CheckConsistency,
    /// Upload a tablet snapshot to remote storage.
    Upload,
    /// Restore a tablet from remote storage.
    Restore,
    /// Make a local snapshot of a tablet.
    MakeSnapshot,
    /// Release a local snapshot.
    ReleaseSnapshot,
}

impl TaskType {
    /// All task types that consume the task queue, i.e. everything the
    /// master can assign.
    pub const ALL: [TaskType; 14] = [
        TaskType::CreateTablet,
        TaskType::DropTablet,
        TaskType::Push,
        TaskType::Delete,
        TaskType::AlterTablet,
        TaskType::QuerySplitKey,
        TaskType::Clone,
        TaskType::StorageMediumMigrate,
        TaskType::CancelDeleteData,
        TaskType::CheckConsistency,
        TaskType::Upload,
        TaskType::Restore,
        TaskType::MakeSnapshot,
        TaskType::ReleaseSnapshot,
    ];
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::CreateTablet => "create_tablet",
            TaskType::DropTablet => "drop_tablet",
            TaskType::Push => "push",
            TaskType::Delete => "delete",
            TaskType::AlterTablet => "alter_tablet",
            TaskType::QuerySplitKey => "query_split_key",
            TaskType::Clone => "clone",
            TaskType::StorageMediumMigrate => "storage_medium_migrate",
            TaskType::CancelDeleteData => "cancel_delete_data",
            TaskType::CheckConsistency => "check_consistency",
            TaskType::Upload => "upload",
            TaskType::Restore => "restore",
            TaskType::MakeSnapshot => "make_snapshot",
            TaskType::ReleaseSnapshot => "release_snapshot",
        };
        f.write_str(s)
    }
}

/// Scheduling priority of a task within its type's queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPriority {
    /// Served in insertion order.
    #[default]
    Normal,
    /// Served ahead of normal tasks when a worker looks for one.
    High,
}

/// Storage medium a tablet lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMedium {
    /// Spinning disk.
    Hdd,
    /// Solid state.
    Ssd,
}

/// Whether a push applies a load file or a delete predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushType {
    /// Apply a load file.
    Load,
    /// Apply delete conditions.
    Delete,
}

/// The kind of alter-tablet work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterTabletType {
    /// Linked schema change.
    SchemaChange,
    /// Rollup index creation.
    Rollup,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTabletReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub storage_medium: StorageMedium,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTabletReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
    pub push_type: PushType,
    /// Location of the load file to fetch before applying, if any.
    pub http_file_path: Option<String>,
    pub http_file_size: Option<i64>,
    /// Delete predicates, present when `push_type` is [`PushType::Delete`].
    pub delete_conditions: Vec<String>,
    pub timeout_secs: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterTabletReq {
    pub base_tablet_id: TabletId,
    pub base_schema_hash: SchemaHash,
    pub new_tablet_id: TabletId,
    pub new_schema_hash: SchemaHash,
    pub alter_type: AlterTabletType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySplitKeyReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub block_row_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    /// Candidate source backends, tried in order.
    pub src_backends: Vec<BackendAddr>,
    /// Version the clone must reach to be usable.
    pub committed_version: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMediumMigrateReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub storage_medium: StorageMedium,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDeleteDataReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConsistencyReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub remote_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub remote_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
}

/// The type-specific body of a task assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPayload {
    CreateTablet(CreateTabletReq),
    DropTablet(DropTabletReq),
    Push(PushReq),
    Delete(PushReq),
    AlterTablet(AlterTabletReq),
    QuerySplitKey(QuerySplitKeyReq),
    Clone(CloneReq),
    StorageMediumMigrate(StorageMediumMigrateReq),
    CancelDeleteData(CancelDeleteDataReq),
    CheckConsistency(CheckConsistencyReq),
    Upload(UploadReq),
    Restore(RestoreReq),
    MakeSnapshot(SnapshotReq),
    ReleaseSnapshot {
        /// Path returned by an earlier make-snapshot task.
        snapshot_path: String,
    },
}

impl TaskPayload {
    /// The task type this payload belongs to.
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::CreateTablet(_) => TaskType::CreateTablet,
            TaskPayload::DropTablet(_) => TaskType::DropTablet,
            TaskPayload::Push(_) => TaskType::Push,
            TaskPayload::Delete(_) => TaskType::Delete,
            TaskPayload::AlterTablet(_) => TaskType::AlterTablet,
            TaskPayload::QuerySplitKey(_) => TaskType::QuerySplitKey,
            TaskPayload::Clone(_) => TaskType::Clone,
            TaskPayload::StorageMediumMigrate(_) => TaskType::StorageMediumMigrate,
            TaskPayload::CancelDeleteData(_) => TaskType::CancelDeleteData,
            TaskPayload::CheckConsistency(_) => TaskType::CheckConsistency,
            TaskPayload::Upload(_) => TaskType::Upload,
            TaskPayload::Restore(_) => TaskType::Restore,
            TaskPayload::MakeSnapshot(_) => TaskType::MakeSnapshot,
            TaskPayload::ReleaseSnapshot { .. } => TaskType::ReleaseSnapshot,
        }
    }
}

/// One task assignment from the master.
///
/// Immutable once enqueued; owned by the queue until exactly one worker
/// dequeues it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Uniquely names this logical task instance. The master reuses the
    /// signature when it redelivers a task it believes was lost.
    pub signature: i64,
    /// The user on whose behalf the task runs, for fairness accounting.
    pub user: String,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
}

impl TaskRequest {
    /// The task type, derived from the payload.
    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }
}

/// Outcome classification in a [`TaskStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// The task succeeded.
    Ok,
    /// The task failed; see the message list.
    InternalError,
}

/// Status attached to a finish-task report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub code: StatusCode,
    /// Human-readable failure detail, empty on success.
    pub error_msgs: Vec<String>,
}

impl TaskStatus {
    /// A success status.
    pub fn ok() -> TaskStatus {
        TaskStatus {
            code: StatusCode::Ok,
            error_msgs: Vec::new(),
        }
    }

    /// A failure status with a single message.
    pub fn error(msg: impl Into<String>) -> TaskStatus {
        TaskStatus {
            code: StatusCode::InternalError,
            error_msgs: vec![msg.into()],
        }
    }

    /// A failure status carrying all collected messages.
    pub fn errors(msgs: Vec<String>) -> TaskStatus {
        TaskStatus {
            code: StatusCode::InternalError,
            error_msgs: msgs,
        }
    }

    /// Whether this is a success status.
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

/// A tablet's identity and data state, as reported to the master.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
    pub row_count: i64,
    pub data_size: i64,
}

/// A file named by a remote listing, relative to the snapshot root on the
/// source backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub size: u64,
}

/// The message sent to the master summarizing a completed task's outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishTaskRequest {
    pub backend: BackendAddr,
    pub task_type: TaskType,
    pub signature: i64,
    pub status: TaskStatus,
    /// The backend's report version at completion time, so the master can
    /// order this against periodic state reports.
    pub report_version: u64,
    /// Tablets touched by the task, for master-side metadata refresh.
    pub finish_tablet_infos: Vec<TabletInfo>,
    /// Set by make-snapshot tasks.
    pub snapshot_path: Option<String>,
    /// Set by query-split-key tasks.
    pub split_keys: Vec<String>,
    /// Version actually checked by a check-consistency task.
    pub checked_version: Option<i64>,
    /// Hash of the checked version.
    pub checked_version_hash: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_request_wire_shape() {
        let req = TaskRequest {
            signature: 42,
            user: "u1".into(),
            priority: TaskPriority::High,
            payload: TaskPayload::DropTablet(DropTabletReq {
                tablet_id: 1001,
                schema_hash: 333,
            }),
        };
        let value = serde_json::to_value(&req).unwrap();
        // The payload tag doubles as the task type on the wire.
        assert_eq!(value["payload"]["DropTablet"]["tablet_id"], 1001);
        assert_eq!(value["priority"], "High");

        let parsed: TaskRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.task_type(), TaskType::DropTablet);
        assert_eq!(parsed, req);
    }
}
