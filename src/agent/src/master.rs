// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The RPC boundary to the master.
//!
//! The transport itself (and its pooled connections) is an external
//! collaborator behind [`MasterClient`]; this module owns the bounded-retry
//! policy layered on top of it.

use tracing::{error, warn};

use quarry_agent_types::{AgentReport, FinishTaskRequest};
use quarry_ore::retry::Retry;

/// An error from the master RPC boundary.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// The request never reached the master or the connection broke.
    #[error("master transport: {0}")]
    Transport(String),
    /// The master received the request and rejected it.
    #[error("master rejected request: {0}")]
    Rejected(String),
}

/// A thin client to the master.
///
/// Implementations are pooled-connection RPC stubs; they must be callable
/// concurrently from every worker thread. Retry is the caller's concern,
/// not the client's.
pub trait MasterClient: Send + Sync + 'static {
    /// Acknowledges a completed task.
    fn finish_task(&self, req: &FinishTaskRequest) -> Result<(), MasterError>;

    /// Pushes a periodic state report.
    fn report(&self, report: &AgentReport) -> Result<(), MasterError>;
}

/// Sends a finish-task report, retrying up to `max_tries` total attempts.
///
/// On exhaustion the failure is logged and the task instance is abandoned
/// locally: the master notices the missing acknowledgment via its own
/// timeout and redelivers, which flows back through the dedup gate.
pub(crate) fn finish_task_with_retry(
    client: &dyn MasterClient,
    max_tries: usize,
    req: &FinishTaskRequest,
) {
    let result = Retry::fixed(max_tries).retry(|attempt| {
        client.finish_task(req).inspect_err(|e| {
            warn!(
                task_type = %req.task_type,
                signature = req.signature,
                attempt,
                "finish task rpc failed: {e}"
            );
        })
    });
    if let Err(e) = result {
        error!(
            task_type = %req.task_type,
            signature = req.signature,
            "abandoning finish task report after {max_tries} attempts: {e}"
        );
    }
}

/// Submits a periodic report, retrying up to `max_tries` total attempts.
///
/// Returns whether any attempt succeeded, so the caller knows whether to
/// bump the report version.
pub(crate) fn report_with_retry(
    client: &dyn MasterClient,
    max_tries: usize,
    report: &AgentReport,
) -> bool {
    let result = Retry::fixed(max_tries).retry(|attempt| {
        client.report(report).inspect_err(|e| {
            warn!(kind = report.kind(), attempt, "report rpc failed: {e}");
        })
    });
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(
                kind = report.kind(),
                "dropping report after {max_tries} attempts: {e}"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use quarry_agent_types::{
        BackendAddr, DiskReport, StatusCode, TaskStatus, TaskType,
    };

    use super::*;

    struct FlakyMaster {
        finish_calls: AtomicUsize,
        report_calls: AtomicUsize,
        /// Results to hand out, in order; when exhausted, succeed.
        finish_script: Mutex<Vec<Result<(), MasterError>>>,
    }

    impl FlakyMaster {
        fn failing_forever() -> FlakyMaster {
            FlakyMaster {
                finish_calls: AtomicUsize::new(0),
                report_calls: AtomicUsize::new(0),
                finish_script: Mutex::new(Vec::new()),
            }
        }

        fn scripted(script: Vec<Result<(), MasterError>>) -> FlakyMaster {
            FlakyMaster {
                finish_calls: AtomicUsize::new(0),
                report_calls: AtomicUsize::new(0),
                finish_script: Mutex::new(script),
            }
        }
    }

    impl MasterClient for FlakyMaster {
        fn finish_task(&self, _req: &FinishTaskRequest) -> Result<(), MasterError> {
            self.finish_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.finish_script.lock().unwrap();
            if script.is_empty() {
                Err(MasterError::Transport("connection refused".into()))
            } else {
                script.remove(0)
            }
        }

        fn report(&self, _report: &AgentReport) -> Result<(), MasterError> {
            self.report_calls.fetch_add(1, Ordering::SeqCst);
            Err(MasterError::Transport("connection refused".into()))
        }
    }

    fn finish_req() -> FinishTaskRequest {
        FinishTaskRequest {
            backend: BackendAddr {
                host: "127.0.0.1".into(),
                be_port: 9060,
                http_port: 8040,
            },
            task_type: TaskType::Push,
            signature: 42,
            status: TaskStatus::ok(),
            report_version: 0,
            finish_tablet_infos: Vec::new(),
            snapshot_path: None,
            split_keys: Vec::new(),
            checked_version: None,
            checked_version_hash: None,
        }
    }

    #[test]
    fn finish_task_attempted_exactly_max_tries() {
        let master = FlakyMaster::failing_forever();
        // Must not panic past the caller when all attempts fail.
        finish_task_with_retry(&master, 3, &finish_req());
        assert_eq!(master.finish_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn finish_task_stops_on_success() {
        let master = FlakyMaster::scripted(vec![
            Err(MasterError::Transport("reset".into())),
            Ok(()),
        ]);
        finish_task_with_retry(&master, 3, &finish_req());
        assert_eq!(master.finish_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn report_retry_reports_outcome() {
        let master = FlakyMaster::failing_forever();
        let report = AgentReport::DiskState(DiskReport {
            backend: finish_req().backend,
            disks: Vec::new(),
        });
        assert!(!report_with_retry(&master, 3, &report));
        assert_eq!(master.report_calls.load(Ordering::SeqCst), 3);
        // Sanity-check the status helpers used across finish paths.
        assert_eq!(TaskStatus::error("boom").code, StatusCode::InternalError);
    }
}
