// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Periodic state reporting to the master.
//!
//! Reporters do not consume the task queue. Each runs on its own timer,
//! builds a snapshot of local state and pushes it with the same bounded
//! retry as finish-task reports. Every successful cycle bumps the shared
//! report version, which the master uses to tell stale pushes from fresh
//! ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use quarry_agent_types::{AgentReport, DiskReport, TabletReport, TaskInventoryReport};

use crate::config::AgentConfig;
use crate::master::{report_with_retry, MasterClient};
use crate::registry::TaskRegistry;
use crate::storage::StorageExecutor;

/// Monotonic freshness counter shared by all report kinds and stamped on
/// finish-task reports.
///
/// Never decreases; wrapping at integer overflow is out of scope.
#[derive(Debug, Default)]
pub struct ReportVersion(AtomicU64);

impl ReportVersion {
    /// Creates a version counter starting at zero.
    pub fn new() -> ReportVersion {
        ReportVersion::default()
    }

    /// The current version.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Increments the version, returning the new value.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// A resettable "stop now" signal reporters sleep against, so shutdown does
/// not have to wait out a full report interval.
#[derive(Debug, Default)]
pub(crate) struct ShutdownFlag {
    state: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownFlag {
    pub(crate) fn new() -> ShutdownFlag {
        ShutdownFlag::default()
    }

    pub(crate) fn signal(&self) {
        let mut state = self.state.lock().expect("shutdown lock poisoned");
        *state = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Sleeps up to `timeout`, returning `true` if shutdown was signaled.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock().expect("shutdown lock poisoned");
        let deadline = std::time::Instant::now() + timeout;
        while !*state {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("shutdown lock poisoned");
            state = next;
        }
        true
    }
}

/// Which state a reporter pushes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReportKind {
    Task,
    DiskState,
    Tablet,
}

impl ReportKind {
    fn interval(self, cfg: &AgentConfig) -> Duration {
        match self {
            ReportKind::Task => cfg.report_task_interval,
            ReportKind::DiskState => cfg.report_disk_interval,
            ReportKind::Tablet => cfg.report_tablet_interval,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ReportKind::Task => "task",
            ReportKind::DiskState => "disk_state",
            ReportKind::Tablet => "tablet",
        }
    }
}

/// Runs one report cycle: build, push with retry, bump the version on
/// success. Returns whether the cycle succeeded.
pub(crate) fn run_cycle(
    kind: ReportKind,
    cfg: &AgentConfig,
    registry: &TaskRegistry,
    storage: &dyn StorageExecutor,
    master: &dyn MasterClient,
    report_version: &ReportVersion,
) -> bool {
    let report = match kind {
        ReportKind::Task => AgentReport::Task(TaskInventoryReport {
            backend: cfg.backend.clone(),
            in_flight: registry.in_flight(),
        }),
        ReportKind::DiskState => match storage.root_path_stats() {
            Ok(disks) => AgentReport::DiskState(DiskReport {
                backend: cfg.backend.clone(),
                disks,
            }),
            Err(e) => {
                warn!(kind = kind.name(), "building report failed: {e}");
                return false;
            }
        },
        ReportKind::Tablet => match storage.report_all_tablets() {
            Ok(tablets) => AgentReport::Tablet(TabletReport {
                backend: cfg.backend.clone(),
                report_version: report_version.current(),
                tablets,
            }),
            Err(e) => {
                warn!(kind = kind.name(), "building report failed: {e}");
                return false;
            }
        },
    };
    if !report_with_retry(master, cfg.report_max_tries, &report) {
        return false;
    }
    let version = report_version.bump();
    debug!(kind = kind.name(), version, "report accepted by master");
    true
}

/// A single reporter thread.
#[derive(Debug)]
pub(crate) struct Reporter {
    kind: ReportKind,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Spawns the reporter thread; it runs a cycle immediately, then every
    /// interval until shutdown.
    pub(crate) fn spawn(
        kind: ReportKind,
        cfg: Arc<AgentConfig>,
        registry: Arc<TaskRegistry>,
        storage: Arc<dyn StorageExecutor>,
        master: Arc<dyn MasterClient>,
        report_version: Arc<ReportVersion>,
        shutdown: Arc<ShutdownFlag>,
    ) -> Reporter {
        let name = format!("report-{}", kind.name());
        let handle = quarry_ore::thread::spawn(&name, move || {
            let interval = kind.interval(&cfg);
            loop {
                run_cycle(kind, &cfg, &registry, &*storage, &*master, &report_version);
                if shutdown.wait_for(interval) {
                    break;
                }
            }
            debug!(kind = kind.name(), "reporter exiting");
        });
        Reporter {
            kind,
            handle: Some(handle),
        }
    }

    /// Joins the reporter thread. Call only after signaling shutdown.
    pub(crate) fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(kind = self.kind.name(), "reporter thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    use quarry_agent_types::{
        BackendAddr, CancelDeleteDataReq, CheckConsistencyReq, CreateTabletReq, DiskStat,
        DropTabletReq, FinishTaskRequest, MasterInfo, PushReq, QuerySplitKeyReq, RestoreReq,
        SnapshotReq, StorageMediumMigrateReq, TabletInfo, UploadReq,
    };

    use crate::master::MasterError;
    use crate::storage::{AlterTabletStatus, StorageError};

    use super::*;

    struct StubStorage {
        disks_fail: bool,
    }

    impl StorageExecutor for StubStorage {
        fn create_tablet(&self, _req: &CreateTabletReq) -> Result<(), StorageError> {
            Ok(())
        }
        fn drop_tablet(&self, _req: &DropTabletReq) -> Result<(), StorageError> {
            Ok(())
        }
        fn push(&self, _req: &PushReq) -> Result<Vec<TabletInfo>, StorageError> {
            Ok(Vec::new())
        }
        fn begin_alter_tablet(&self, _: i64, _: i64, _: i64, _: i64) -> Result<(), StorageError> {
            Ok(())
        }
        fn show_alter_tablet_status(
            &self,
            _: i64,
            _: i64,
        ) -> Result<AlterTabletStatus, StorageError> {
            Ok(AlterTabletStatus::Finished)
        }
        fn query_split_key(&self, _req: &QuerySplitKeyReq) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
        fn storage_medium_migrate(
            &self,
            _req: &StorageMediumMigrateReq,
        ) -> Result<(), StorageError> {
            Ok(())
        }
        fn cancel_delete_data(&self, _req: &CancelDeleteDataReq) -> Result<(), StorageError> {
            Ok(())
        }
        fn check_consistency(&self, _req: &CheckConsistencyReq) -> Result<(i64, i64), StorageError> {
            Ok((0, 0))
        }
        fn upload(&self, _req: &UploadReq) -> Result<(), StorageError> {
            Ok(())
        }
        fn restore(&self, _req: &RestoreReq) -> Result<(), StorageError> {
            Ok(())
        }
        fn make_snapshot(&self, _req: &SnapshotReq) -> Result<String, StorageError> {
            Ok("/snap".into())
        }
        fn release_snapshot(&self, _snapshot_path: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn obtain_clone_path(&self, _: i64, _: i64) -> Result<String, StorageError> {
            Ok("/clone".into())
        }
        fn load_cloned_tablet(&self, _: i64, _: i64, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn get_tablet_info(&self, tablet_id: i64, schema_hash: i64) -> Result<TabletInfo, StorageError> {
            Ok(TabletInfo {
                tablet_id,
                schema_hash,
                version: 1,
                version_hash: 1,
                row_count: 0,
                data_size: 0,
            })
        }
        fn report_all_tablets(&self) -> Result<Vec<TabletInfo>, StorageError> {
            Ok(Vec::new())
        }
        fn root_path_stats(&self) -> Result<Vec<DiskStat>, StorageError> {
            if self.disks_fail {
                Err(StorageError::Internal("disk scan failed".into()))
            } else {
                Ok(vec![DiskStat {
                    root_path: "/data".into(),
                    capacity_bytes: 100,
                    available_bytes: 50,
                    in_use: true,
                }])
            }
        }
    }

    struct ScriptedMaster {
        reports: StdMutex<Vec<AgentReport>>,
        fail_next: AtomicUsize,
    }

    impl ScriptedMaster {
        fn new() -> ScriptedMaster {
            ScriptedMaster {
                reports: StdMutex::new(Vec::new()),
                fail_next: AtomicUsize::new(0),
            }
        }
    }

    impl MasterClient for ScriptedMaster {
        fn finish_task(&self, _req: &FinishTaskRequest) -> Result<(), MasterError> {
            Ok(())
        }

        fn report(&self, report: &AgentReport) -> Result<(), MasterError> {
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(MasterError::Transport("unreachable".into()));
            }
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn test_cfg() -> AgentConfig {
        AgentConfig::new(
            BackendAddr {
                host: "127.0.0.1".into(),
                be_port: 9060,
                http_port: 8040,
            },
            MasterInfo {
                host: "127.0.0.1".into(),
                port: 9020,
                cluster_id: 1,
                epoch: 0,
            },
        )
    }

    #[test]
    fn report_version_bumped_only_on_success() {
        let cfg = test_cfg();
        let registry = TaskRegistry::new();
        let storage = StubStorage { disks_fail: false };
        let master = ScriptedMaster::new();
        let version = ReportVersion::new();

        assert!(run_cycle(
            ReportKind::DiskState,
            &cfg,
            &registry,
            &storage,
            &master,
            &version
        ));
        assert_eq!(version.current(), 1);

        // Exhaust every retry of the next cycle.
        master.fail_next.store(cfg.report_max_tries, Ordering::SeqCst);
        assert!(!run_cycle(
            ReportKind::DiskState,
            &cfg,
            &registry,
            &storage,
            &master,
            &version
        ));
        assert_eq!(version.current(), 1);

        assert!(run_cycle(
            ReportKind::DiskState,
            &cfg,
            &registry,
            &storage,
            &master,
            &version
        ));
        assert_eq!(version.current(), 2);
    }

    #[test]
    fn failed_snapshot_skips_cycle() {
        let cfg = test_cfg();
        let registry = TaskRegistry::new();
        let storage = StubStorage { disks_fail: true };
        let master = ScriptedMaster::new();
        let version = ReportVersion::new();

        assert!(!run_cycle(
            ReportKind::DiskState,
            &cfg,
            &registry,
            &storage,
            &master,
            &version
        ));
        assert_eq!(version.current(), 0);
        assert!(master.reports.lock().unwrap().is_empty());
    }

    #[test]
    fn task_report_carries_in_flight_signatures() {
        use quarry_agent_types::TaskType;

        let cfg = test_cfg();
        let registry = TaskRegistry::new();
        registry.register(TaskType::Push, 42, "u1");
        let storage = StubStorage { disks_fail: false };
        let master = ScriptedMaster::new();
        let version = ReportVersion::new();

        assert!(run_cycle(
            ReportKind::Task,
            &cfg,
            &registry,
            &storage,
            &master,
            &version
        ));
        let reports = master.reports.lock().unwrap();
        let AgentReport::Task(report) = &reports[0] else {
            panic!("expected task report");
        };
        assert_eq!(report.in_flight.get(&TaskType::Push), Some(&vec![42]));
    }

    #[test]
    fn shutdown_flag_cuts_sleep_short() {
        let flag = Arc::new(ShutdownFlag::new());
        let waiter = {
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || flag.wait_for(Duration::from_secs(30)))
        };
        std::thread::sleep(Duration::from_millis(50));
        flag.signal();
        assert!(waiter.join().unwrap());
    }
}
