// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The boundary to the storage engine.
//!
//! The column-file engine that actually mutates tablets is an external
//! collaborator; the agent drives it through [`StorageExecutor`] and never
//! looks inside. Production wires in the real engine, tests wire in mocks.

use quarry_agent_types::{
    CancelDeleteDataReq, CheckConsistencyReq, CreateTabletReq, DiskStat, DropTabletReq, PushReq,
    QuerySplitKeyReq, RestoreReq, SchemaHash, SnapshotReq, StorageMediumMigrateReq, TabletId,
    TabletInfo, UploadReq,
};

/// An error from the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The named tablet does not exist at the given schema hash.
    #[error("tablet {tablet_id} with schema hash {schema_hash} not found")]
    TabletNotFound {
        /// The tablet that was requested.
        tablet_id: TabletId,
        /// The schema hash that was requested.
        schema_hash: SchemaHash,
    },
    /// Any other engine failure, already rendered for the message list.
    #[error("storage engine: {0}")]
    Internal(String),
}

/// Progress of an asynchronous alter-tablet operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlterTabletStatus {
    /// The schema change is still being applied.
    Running,
    /// The schema change completed.
    Finished,
    /// The schema change failed.
    Failed,
}

/// Interface to the storage engine collaborator.
///
/// Each method corresponds to one engine command; implementations are
/// expected to be internally synchronized and callable from many worker
/// threads at once. `begin_alter_tablet` only starts background work; the
/// worker polls [`StorageExecutor::show_alter_tablet_status`] until it is
/// terminal.
pub trait StorageExecutor: Send + Sync + 'static {
    /// Creates a tablet.
    fn create_tablet(&self, req: &CreateTabletReq) -> Result<(), StorageError>;

    /// Drops a tablet.
    fn drop_tablet(&self, req: &DropTabletReq) -> Result<(), StorageError>;

    /// Applies a load file or a delete predicate to a tablet, returning the
    /// tablets whose data state changed.
    fn push(&self, req: &PushReq) -> Result<Vec<TabletInfo>, StorageError>;

    /// Starts an alter-tablet (schema change or rollup) in the background.
    fn begin_alter_tablet(
        &self,
        base_tablet_id: TabletId,
        base_schema_hash: SchemaHash,
        new_tablet_id: TabletId,
        new_schema_hash: SchemaHash,
    ) -> Result<(), StorageError>;

    /// Reports the progress of an alter-tablet started earlier.
    fn show_alter_tablet_status(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
    ) -> Result<AlterTabletStatus, StorageError>;

    /// Computes split keys for a tablet.
    fn query_split_key(&self, req: &QuerySplitKeyReq) -> Result<Vec<String>, StorageError>;

    /// Moves a tablet to a different storage medium.
    fn storage_medium_migrate(&self, req: &StorageMediumMigrateReq) -> Result<(), StorageError>;

    /// Cancels a previously issued delete.
    fn cancel_delete_data(&self, req: &CancelDeleteDataReq) -> Result<(), StorageError>;

    /// Verifies a tablet's checksum, returning the checked version and its
    /// hash.
    fn check_consistency(&self, req: &CheckConsistencyReq) -> Result<(i64, i64), StorageError>;

    /// Uploads a tablet snapshot to remote storage.
    fn upload(&self, req: &UploadReq) -> Result<(), StorageError>;

    /// Restores a tablet from remote storage.
    fn restore(&self, req: &RestoreReq) -> Result<(), StorageError>;

    /// Makes a local snapshot, returning its path.
    fn make_snapshot(&self, req: &SnapshotReq) -> Result<String, StorageError>;

    /// Releases a snapshot made earlier.
    fn release_snapshot(&self, snapshot_path: &str) -> Result<(), StorageError>;

    /// Allocates a local directory a clone can download into.
    fn obtain_clone_path(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
    ) -> Result<String, StorageError>;

    /// Registers a tablet whose files were just cloned into `clone_path`.
    fn load_cloned_tablet(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        clone_path: &str,
    ) -> Result<(), StorageError>;

    /// Fetches a tablet's current data state.
    fn get_tablet_info(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
    ) -> Result<TabletInfo, StorageError>;

    /// Full tablet inventory, for the periodic tablet report.
    fn report_all_tablets(&self) -> Result<Vec<TabletInfo>, StorageError>;

    /// Capacity and usage of each storage root path, for the disk report.
    fn root_path_stats(&self) -> Result<Vec<DiskStat>, StorageError>;
}
