// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-task-type execution routines.
//!
//! Each handler is a thin adapter: it validates the payload shape, calls
//! into the storage executor or transfer collaborator, and translates the
//! result into a [`TaskOutcome`] for the finish-task report. Scheduling,
//! dedup, retry-of-finish and reporting live in the worker pool and are
//! never duplicated here.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use quarry_agent_types::{
    SchemaHash, TabletId, TabletInfo, TaskPayload, TaskRequest, TaskStatus, TaskType,
};
use quarry_ore::retry::Retry;

use crate::config::AgentConfig;
use crate::storage::{AlterTabletStatus, StorageExecutor};
use crate::transfer::{clone_copy, FileTransfer};

/// What a handler produced, folded into the finish-task report by the pool.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    /// Success or failure with messages.
    pub status: TaskStatus,
    /// Tablets whose data state changed.
    pub finish_tablet_infos: Vec<TabletInfo>,
    /// Snapshot path, for make-snapshot tasks.
    pub snapshot_path: Option<String>,
    /// Split keys, for query-split-key tasks.
    pub split_keys: Vec<String>,
    /// Checked version, for check-consistency tasks.
    pub checked_version: Option<i64>,
    /// Checked version hash, for check-consistency tasks.
    pub checked_version_hash: Option<i64>,
}

impl TaskOutcome {
    fn ok() -> TaskOutcome {
        TaskOutcome {
            status: TaskStatus::ok(),
            finish_tablet_infos: Vec::new(),
            snapshot_path: None,
            split_keys: Vec::new(),
            checked_version: None,
            checked_version_hash: None,
        }
    }

    fn error(msg: impl Into<String>) -> TaskOutcome {
        TaskOutcome {
            status: TaskStatus::error(msg),
            ..TaskOutcome::ok()
        }
    }
}

/// A type-specific execution routine.
///
/// Handlers never see the queue, the registry or the master client; they
/// turn exactly one dequeued request into an outcome. Failures are folded
/// into the outcome's message list, never propagated.
pub(crate) trait TaskHandler: Send + Sync {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome;
}

fn wrong_payload(task: &TaskRequest, expected: TaskType) -> TaskOutcome {
    TaskOutcome::error(format!(
        "task {} carries a {} payload, expected {expected}",
        task.signature,
        task.task_type(),
    ))
}

/// Fetches tablet info after a successful mutation, downgrading the task to
/// failed if the fetch fails: the master relies on the info to refresh its
/// metadata.
fn finish_with_tablet_info(
    storage: &dyn StorageExecutor,
    tablet_id: TabletId,
    schema_hash: SchemaHash,
    signature: i64,
) -> TaskOutcome {
    match storage.get_tablet_info(tablet_id, schema_hash) {
        Ok(info) => TaskOutcome {
            finish_tablet_infos: vec![info],
            ..TaskOutcome::ok()
        },
        Err(e) => {
            warn!(tablet_id, signature, "get tablet info failed: {e}");
            TaskOutcome::error(format!("get tablet info for {tablet_id}: {e}"))
        }
    }
}

struct CreateTabletHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for CreateTabletHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::CreateTablet(req) = &task.payload else {
            return wrong_payload(task, TaskType::CreateTablet);
        };
        match self.storage.create_tablet(req) {
            Ok(()) => finish_with_tablet_info(
                &*self.storage,
                req.tablet_id,
                req.schema_hash,
                task.signature,
            ),
            Err(e) => TaskOutcome::error(format!("create tablet {}: {e}", req.tablet_id)),
        }
    }
}

struct DropTabletHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for DropTabletHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::DropTablet(req) = &task.payload else {
            return wrong_payload(task, TaskType::DropTablet);
        };
        match self.storage.drop_tablet(req) {
            Ok(()) => TaskOutcome::ok(),
            Err(e) => TaskOutcome::error(format!("drop tablet {}: {e}", req.tablet_id)),
        }
    }
}

/// Handles both push and delete tasks: a delete is a push whose payload
/// carries delete conditions.
struct PushHandler {
    storage: Arc<dyn StorageExecutor>,
    max_tries: usize,
}

impl TaskHandler for PushHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let (TaskPayload::Push(req) | TaskPayload::Delete(req)) = &task.payload else {
            return wrong_payload(task, TaskType::Push);
        };
        let pushed = Retry::fixed(self.max_tries).retry(|attempt| {
            self.storage.push(req).inspect_err(|e| {
                warn!(
                    tablet_id = req.tablet_id,
                    signature = task.signature,
                    attempt,
                    "push failed: {e}"
                );
            })
        });
        match pushed {
            Ok(infos) => TaskOutcome {
                finish_tablet_infos: infos,
                ..TaskOutcome::ok()
            },
            Err(e) => TaskOutcome::error(format!("push to tablet {}: {e}", req.tablet_id)),
        }
    }
}

/// Starts the alter in the storage engine, then polls its status until
/// terminal. There is no local timeout: a stuck alter is the master's
/// problem to notice.
struct AlterTabletHandler {
    storage: Arc<dyn StorageExecutor>,
    poll_interval: Duration,
}

impl TaskHandler for AlterTabletHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::AlterTablet(req) = &task.payload else {
            return wrong_payload(task, TaskType::AlterTablet);
        };
        if let Err(e) = self.storage.begin_alter_tablet(
            req.base_tablet_id,
            req.base_schema_hash,
            req.new_tablet_id,
            req.new_schema_hash,
        ) {
            return TaskOutcome::error(format!(
                "begin alter tablet {}: {e}",
                req.base_tablet_id
            ));
        }
        loop {
            match self
                .storage
                .show_alter_tablet_status(req.new_tablet_id, req.new_schema_hash)
            {
                Ok(AlterTabletStatus::Running) => thread::sleep(self.poll_interval),
                Ok(AlterTabletStatus::Finished) => {
                    info!(
                        base_tablet_id = req.base_tablet_id,
                        new_tablet_id = req.new_tablet_id,
                        signature = task.signature,
                        "alter tablet finished"
                    );
                    return finish_with_tablet_info(
                        &*self.storage,
                        req.new_tablet_id,
                        req.new_schema_hash,
                        task.signature,
                    );
                }
                Ok(AlterTabletStatus::Failed) => {
                    return TaskOutcome::error(format!(
                        "alter tablet {} failed in storage engine",
                        req.base_tablet_id
                    ));
                }
                Err(e) => {
                    return TaskOutcome::error(format!(
                        "show alter status for tablet {}: {e}",
                        req.new_tablet_id
                    ));
                }
            }
        }
    }
}

struct QuerySplitKeyHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for QuerySplitKeyHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::QuerySplitKey(req) = &task.payload else {
            return wrong_payload(task, TaskType::QuerySplitKey);
        };
        match self.storage.query_split_key(req) {
            Ok(split_keys) => TaskOutcome {
                split_keys,
                ..TaskOutcome::ok()
            },
            Err(e) => {
                TaskOutcome::error(format!("query split key for tablet {}: {e}", req.tablet_id))
            }
        }
    }
}

struct CloneHandler {
    storage: Arc<dyn StorageExecutor>,
    transfer: Arc<dyn FileTransfer>,
    cfg: Arc<AgentConfig>,
}

impl TaskHandler for CloneHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::Clone(req) = &task.payload else {
            return wrong_payload(task, TaskType::Clone);
        };
        let clone_path = match self.storage.obtain_clone_path(req.tablet_id, req.schema_hash) {
            Ok(path) => path,
            Err(e) => {
                return TaskOutcome::error(format!(
                    "obtain clone path for tablet {}: {e}",
                    req.tablet_id
                ));
            }
        };
        if let Err(error_msgs) = clone_copy(
            &*self.transfer,
            req,
            task.signature,
            &clone_path,
            &self.cfg.download_url_prefix,
            self.cfg.list_remote_file_timeout,
            self.cfg.download_file_max_tries,
        ) {
            return TaskOutcome {
                status: TaskStatus::errors(error_msgs),
                ..TaskOutcome::ok()
            };
        }
        if let Err(e) =
            self.storage
                .load_cloned_tablet(req.tablet_id, req.schema_hash, &clone_path)
        {
            return TaskOutcome::error(format!("load cloned tablet {}: {e}", req.tablet_id));
        }
        finish_with_tablet_info(
            &*self.storage,
            req.tablet_id,
            req.schema_hash,
            task.signature,
        )
    }
}

struct StorageMediumMigrateHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for StorageMediumMigrateHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::StorageMediumMigrate(req) = &task.payload else {
            return wrong_payload(task, TaskType::StorageMediumMigrate);
        };
        match self.storage.storage_medium_migrate(req) {
            Ok(()) => finish_with_tablet_info(
                &*self.storage,
                req.tablet_id,
                req.schema_hash,
                task.signature,
            ),
            Err(e) => TaskOutcome::error(format!("migrate tablet {}: {e}", req.tablet_id)),
        }
    }
}

struct CancelDeleteDataHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for CancelDeleteDataHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::CancelDeleteData(req) = &task.payload else {
            return wrong_payload(task, TaskType::CancelDeleteData);
        };
        match self.storage.cancel_delete_data(req) {
            Ok(()) => TaskOutcome::ok(),
            Err(e) => {
                TaskOutcome::error(format!("cancel delete on tablet {}: {e}", req.tablet_id))
            }
        }
    }
}

struct CheckConsistencyHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for CheckConsistencyHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::CheckConsistency(req) = &task.payload else {
            return wrong_payload(task, TaskType::CheckConsistency);
        };
        match self.storage.check_consistency(req) {
            Ok((version, version_hash)) => TaskOutcome {
                checked_version: Some(version),
                checked_version_hash: Some(version_hash),
                ..TaskOutcome::ok()
            },
            Err(e) => {
                TaskOutcome::error(format!("check consistency of tablet {}: {e}", req.tablet_id))
            }
        }
    }
}

struct UploadHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for UploadHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::Upload(req) = &task.payload else {
            return wrong_payload(task, TaskType::Upload);
        };
        match self.storage.upload(req) {
            Ok(()) => TaskOutcome::ok(),
            Err(e) => TaskOutcome::error(format!("upload tablet {}: {e}", req.tablet_id)),
        }
    }
}

struct RestoreHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for RestoreHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::Restore(req) = &task.payload else {
            return wrong_payload(task, TaskType::Restore);
        };
        match self.storage.restore(req) {
            Ok(()) => finish_with_tablet_info(
                &*self.storage,
                req.tablet_id,
                req.schema_hash,
                task.signature,
            ),
            Err(e) => TaskOutcome::error(format!("restore tablet {}: {e}", req.tablet_id)),
        }
    }
}

struct MakeSnapshotHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for MakeSnapshotHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::MakeSnapshot(req) = &task.payload else {
            return wrong_payload(task, TaskType::MakeSnapshot);
        };
        match self.storage.make_snapshot(req) {
            Ok(snapshot_path) => TaskOutcome {
                snapshot_path: Some(snapshot_path),
                ..TaskOutcome::ok()
            },
            Err(e) => TaskOutcome::error(format!("make snapshot of tablet {}: {e}", req.tablet_id)),
        }
    }
}

struct ReleaseSnapshotHandler {
    storage: Arc<dyn StorageExecutor>,
}

impl TaskHandler for ReleaseSnapshotHandler {
    fn execute(&self, task: &TaskRequest) -> TaskOutcome {
        let TaskPayload::ReleaseSnapshot { snapshot_path } = &task.payload else {
            return wrong_payload(task, TaskType::ReleaseSnapshot);
        };
        match self.storage.release_snapshot(snapshot_path) {
            Ok(()) => TaskOutcome::ok(),
            Err(e) => TaskOutcome::error(format!("release snapshot {snapshot_path}: {e}")),
        }
    }
}

/// Builds the handler for `task_type`.
///
/// The worker loop is generic over the returned trait object; adding a task
/// type means adding a variant here and nowhere else.
pub(crate) fn handler_for(
    task_type: TaskType,
    storage: Arc<dyn StorageExecutor>,
    transfer: Arc<dyn FileTransfer>,
    cfg: Arc<AgentConfig>,
) -> Box<dyn TaskHandler> {
    match task_type {
        TaskType::CreateTablet => Box::new(CreateTabletHandler { storage }),
        TaskType::DropTablet => Box::new(DropTabletHandler { storage }),
        TaskType::Push | TaskType::Delete => Box::new(PushHandler {
            storage,
            max_tries: cfg.push_max_tries,
        }),
        TaskType::AlterTablet => Box::new(AlterTabletHandler {
            storage,
            poll_interval: cfg.alter_status_poll_interval,
        }),
        TaskType::QuerySplitKey => Box::new(QuerySplitKeyHandler { storage }),
        TaskType::Clone => Box::new(CloneHandler {
            storage,
            transfer,
            cfg,
        }),
        TaskType::StorageMediumMigrate => Box::new(StorageMediumMigrateHandler { storage }),
        TaskType::CancelDeleteData => Box::new(CancelDeleteDataHandler { storage }),
        TaskType::CheckConsistency => Box::new(CheckConsistencyHandler { storage }),
        TaskType::Upload => Box::new(UploadHandler { storage }),
        TaskType::Restore => Box::new(RestoreHandler { storage }),
        TaskType::MakeSnapshot => Box::new(MakeSnapshotHandler { storage }),
        TaskType::ReleaseSnapshot => Box::new(ReleaseSnapshotHandler { storage }),
    }
}
