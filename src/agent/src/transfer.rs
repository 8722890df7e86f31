// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Remote tablet file transfer for clone tasks.
//!
//! A clone lists the files of a tablet on a peer backend, then fetches each
//! one over HTTP into a locally allocated directory. Listing is bounded by a
//! fixed timeout; each download is retried a bounded number of times. All
//! failures are collected as messages for the finish-task report rather
//! than propagated.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use quarry_agent_types::{BackendAddr, CloneReq, RemoteFile, SchemaHash, TabletId};
use quarry_ore::retry::Retry;

/// An error while listing or downloading remote tablet files.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The HTTP request itself failed.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    /// A URL could not be assembled.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Writing the downloaded file failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// The downloaded file did not match the advertised size.
    #[error("downloaded {got} bytes for {path}, expected {expected}")]
    SizeMismatch {
        /// Remote file path.
        path: String,
        /// Advertised size.
        expected: u64,
        /// Size on disk after download.
        got: u64,
    },
}

/// The remote transfer boundary.
///
/// Production uses [`HttpFileTransfer`]; tests substitute mocks to script
/// listing timeouts and download failures.
pub trait FileTransfer: Send + Sync + 'static {
    /// Lists the files of a tablet on a peer backend, bounded by `timeout`.
    fn list_remote_files(
        &self,
        src: &BackendAddr,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        timeout: Duration,
    ) -> Result<Vec<RemoteFile>, TransferError>;

    /// Downloads one file to `local_path`.
    fn download_file(&self, url: &str, local_path: &Path) -> Result<(), TransferError>;
}

/// [`FileTransfer`] over plain HTTP, the production implementation.
#[derive(Debug)]
pub struct HttpFileTransfer {
    client: reqwest::blocking::Client,
}

impl HttpFileTransfer {
    /// Creates a transfer client.
    pub fn new() -> Result<HttpFileTransfer, TransferError> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(HttpFileTransfer { client })
    }
}

impl FileTransfer for HttpFileTransfer {
    fn list_remote_files(
        &self,
        src: &BackendAddr,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        timeout: Duration,
    ) -> Result<Vec<RemoteFile>, TransferError> {
        let mut url = Url::parse(&format!(
            "http://{}:{}/api/_tablet/_list",
            src.host, src.http_port
        ))?;
        url.query_pairs_mut()
            .append_pair("tablet_id", &tablet_id.to_string())
            .append_pair("schema_hash", &schema_hash.to_string());
        let files = self
            .client
            .get(url)
            .timeout(timeout)
            .send()?
            .error_for_status()?
            .json::<Vec<RemoteFile>>()?;
        Ok(files)
    }

    fn download_file(&self, url: &str, local_path: &Path) -> Result<(), TransferError> {
        let url = Url::parse(url)?;
        let bytes = self.client.get(url).send()?.error_for_status()?.bytes()?;
        fs::write(local_path, &bytes)?;
        Ok(())
    }
}

/// Copies a tablet's files from one of the clone sources into
/// `local_data_path`.
///
/// Sources are tried in order; within a source, each file download is
/// attempted up to `download_max_tries` times. On success returns the
/// backend the copy came from. On failure returns every collected error
/// message, for the finish-task report.
pub(crate) fn clone_copy(
    transfer: &dyn FileTransfer,
    req: &CloneReq,
    signature: i64,
    local_data_path: &str,
    download_url_prefix: &str,
    list_timeout: Duration,
    download_max_tries: usize,
) -> Result<BackendAddr, Vec<String>> {
    let mut error_msgs = Vec::new();
    'sources: for src in &req.src_backends {
        let files = match transfer.list_remote_files(
            src,
            req.tablet_id,
            req.schema_hash,
            list_timeout,
        ) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    tablet_id = req.tablet_id,
                    signature,
                    src = %src,
                    "listing remote files failed: {e}"
                );
                error_msgs.push(format!("list files from {src}: {e}"));
                continue;
            }
        };
        for file in &files {
            let file_name = file.path.rsplit('/').next().unwrap_or(&file.path);
            let local_file = Path::new(local_data_path).join(file_name);
            let url = format!(
                "http://{}:{}{}{}",
                src.host, src.http_port, download_url_prefix, file.path
            );
            let downloaded = Retry::fixed(download_max_tries).retry(|attempt| {
                transfer
                    .download_file(&url, &local_file)
                    .and_then(|()| {
                        let got = fs::metadata(&local_file)?.len();
                        if got == file.size {
                            Ok(())
                        } else {
                            Err(TransferError::SizeMismatch {
                                path: file.path.clone(),
                                expected: file.size,
                                got,
                            })
                        }
                    })
                    .inspect_err(|e| {
                        warn!(
                            tablet_id = req.tablet_id,
                            signature,
                            attempt,
                            "download {url} failed: {e}"
                        );
                    })
            });
            if let Err(e) = downloaded {
                error_msgs.push(format!("download {url}: {e}"));
                continue 'sources;
            }
        }
        info!(
            tablet_id = req.tablet_id,
            signature,
            src = %src,
            files = files.len(),
            "clone copy finished"
        );
        return Ok(src.clone());
    }
    Err(error_msgs)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct ScriptedTransfer {
        list_calls: AtomicUsize,
        download_calls: AtomicUsize,
        list_result: fn() -> Result<Vec<RemoteFile>, TransferError>,
        download_ok: bool,
    }

    impl FileTransfer for ScriptedTransfer {
        fn list_remote_files(
            &self,
            _src: &BackendAddr,
            _tablet_id: TabletId,
            _schema_hash: SchemaHash,
            _timeout: Duration,
        ) -> Result<Vec<RemoteFile>, TransferError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            (self.list_result)()
        }

        fn download_file(&self, _url: &str, local_path: &Path) -> Result<(), TransferError> {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            if self.download_ok {
                fs::write(local_path, b"0123")?;
                Ok(())
            } else {
                Err(TransferError::Io(std::io::Error::other("connection reset")))
            }
        }
    }

    fn src_backend() -> BackendAddr {
        BackendAddr {
            host: "10.0.0.2".into(),
            be_port: 9060,
            http_port: 8040,
        }
    }

    fn clone_req() -> CloneReq {
        CloneReq {
            tablet_id: 101,
            schema_hash: 555,
            src_backends: vec![src_backend()],
            committed_version: 5,
        }
    }

    fn one_file() -> Result<Vec<RemoteFile>, TransferError> {
        Ok(vec![RemoteFile {
            path: "data/101/555/segment_0.dat".into(),
            size: 4,
        }])
    }

    fn listing_timeout() -> Result<Vec<RemoteFile>, TransferError> {
        Err(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "listing timed out",
        )))
    }

    #[test]
    fn clone_copy_succeeds() {
        let transfer = ScriptedTransfer {
            list_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            list_result: one_file,
            download_ok: true,
        };
        let dir = std::env::temp_dir().join("quarry-clone-copy-ok");
        fs::create_dir_all(&dir).unwrap();
        let src = clone_copy(
            &transfer,
            &clone_req(),
            7,
            dir.to_str().unwrap(),
            "/api/_tablet/_download?file=",
            Duration::from_secs(15),
            3,
        )
        .unwrap();
        assert_eq!(src, src_backend());
        assert_eq!(transfer.download_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(dir.join("segment_0.dat")).unwrap(), b"0123");
    }

    #[test]
    fn download_attempted_exactly_max_tries() {
        let transfer = ScriptedTransfer {
            list_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            list_result: one_file,
            download_ok: false,
        };
        let dir = std::env::temp_dir().join("quarry-clone-copy-fail");
        fs::create_dir_all(&dir).unwrap();
        let err = clone_copy(
            &transfer,
            &clone_req(),
            7,
            dir.to_str().unwrap(),
            "/api/_tablet/_download?file=",
            Duration::from_secs(15),
            3,
        )
        .unwrap_err();
        assert_eq!(transfer.download_calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.len(), 1);
        assert!(err[0].contains("segment_0.dat"));
    }

    #[test]
    fn listing_failure_downloads_nothing() {
        let transfer = ScriptedTransfer {
            list_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            list_result: listing_timeout,
            download_ok: true,
        };
        let err = clone_copy(
            &transfer,
            &clone_req(),
            7,
            "/nonexistent",
            "/api/_tablet/_download?file=",
            Duration::from_secs(15),
            3,
        )
        .unwrap_err();
        assert_eq!(transfer.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transfer.download_calls.load(Ordering::SeqCst), 0);
        assert!(err[0].contains("listing timed out"));
    }
}
