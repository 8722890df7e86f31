// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Retry utilities.

use std::thread;
use std::time::Duration;

/// Configures a bounded retry operation.
///
/// Unlike an exponential backoff stream, this is deliberately simple: a fixed
/// number of attempts with an optional fixed sleep between them. The callers
/// in the agent rely on the master's own redelivery timeout as the real
/// backoff mechanism, so anything fancier here would just delay that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retry {
    /// The total number of attempts, including the first. Must be nonzero.
    pub max_tries: usize,
    /// A fixed sleep between attempts.
    ///
    /// Skipped if set to [`Duration::ZERO`].
    pub sleep: Duration,
}

impl Retry {
    /// A retry configuration with `max_tries` attempts and no sleep between
    /// them.
    pub fn fixed(max_tries: usize) -> Retry {
        Retry {
            max_tries,
            sleep: Duration::ZERO,
        }
    }

    /// Sets the sleep between attempts.
    pub fn sleep(mut self, sleep: Duration) -> Retry {
        self.sleep = sleep;
        self
    }

    /// Invokes `f` up to [`Retry::max_tries`] times, returning the first
    /// `Ok` or the last `Err`.
    ///
    /// `f` is passed the zero-based attempt number.
    ///
    /// # Panics
    ///
    /// Panics if `max_tries` is zero.
    pub fn retry<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Result<T, E>,
    {
        assert!(self.max_tries > 0, "max_tries must be nonzero");
        let mut attempt = 0;
        loop {
            match f(attempt) {
                Ok(t) => return Ok(t),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_tries {
                        return Err(e);
                    }
                    if self.sleep != Duration::ZERO {
                        thread::sleep(self.sleep);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_stops_on_first_ok() {
        let mut calls = 0;
        let res: Result<i32, &str> = Retry::fixed(3).retry(|_| {
            calls += 1;
            Ok(42)
        });
        assert_eq!(res, Ok(42));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_bounded_attempts() {
        let mut calls = 0;
        let res: Result<(), usize> = Retry::fixed(3).retry(|attempt| {
            calls += 1;
            Err(attempt)
        });
        // The last error carries the final zero-based attempt number.
        assert_eq!(res, Err(2));
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_recovers_mid_series() {
        let res: Result<usize, &str> = Retry::fixed(3).retry(|attempt| {
            if attempt < 1 {
                Err("transient")
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(res, Ok(1));
    }

    #[test]
    #[should_panic(expected = "max_tries must be nonzero")]
    fn retry_rejects_zero_tries() {
        let _: Result<(), ()> = Retry::fixed(0).retry(|_| Ok(()));
    }
}
