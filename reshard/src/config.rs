/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Configuration for the communication layer.
//!
//! Settings are plain values passed into constructors — there is no
//! ambient global configuration. `from_env` reads overrides from the
//! environment for deployments that configure processes externally.

use std::env;
use std::time::Duration;

/// Default bound on a blocking receive.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings consumed by communicator implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommConfig {
    /// How long a blocking receive waits before failing with
    /// [`CommError::Timeout`](crate::CommError::Timeout).
    pub recv_timeout: Duration,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }
}

impl CommConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for unset or unparseable values.
    ///
    /// * `RESHARD_COMM_RECV_TIMEOUT_SECS` — receive timeout in seconds.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = env::var("RESHARD_COMM_RECV_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.recv_timeout = Duration::from_secs(secs);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        assert_eq!(CommConfig::default().recv_timeout, DEFAULT_RECV_TIMEOUT);
    }
}
