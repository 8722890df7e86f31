// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Thread utilities.

use std::thread::{Builder, JoinHandle};

/// Spawns a named thread.
///
/// Like [`std::thread::spawn`], but the thread is given a name so that it is
/// identifiable in stack traces and debuggers.
///
/// # Panics
///
/// Panics if the name contains interior null bytes or the OS refuses to
/// spawn a thread.
pub fn spawn<F, T>(name: &str, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Builder::new()
        .name(name.into())
        .spawn(f)
        .unwrap_or_else(|e| panic!("failed to spawn thread {name}: {e}"))
}
