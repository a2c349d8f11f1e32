// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborator interfaces and their implementations.
//!
//! The orchestration engine only talks to the outside world through the
//! traits in this module:
//!
//! | Trait | Implementations |
//! |-------|-----------------|
//! | [`ContainerDriver`] | [`DockerCli`], [`MockDriver`] |
//! | [`SourceControl`] | [`GitCli`], [`MockSourceControl`] |
//! | [`Router`] | [`RouteTable`] |
//!
//! Adapters are pure I/O: they never touch the rocket repository.

pub mod docker;
pub mod git;
pub mod mock;
pub mod routing;

pub use docker::DockerCli;
pub use git::GitCli;
pub use mock::{MockDriver, MockSourceControl};
pub use routing::RouteTable;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from collaborator operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// A helper program could not be started.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A helper program exited with a non-zero code.
    #[error("{command} exited with code {exit_code}: {stderr}")]
    CommandFailed {
        /// Short description of the command.
        command: String,
        /// Exit code of the process.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// A helper program produced output that could not be interpreted.
    #[error("Unexpected output from {command}: {output}")]
    UnexpectedOutput {
        /// Short description of the command.
        command: String,
        /// The offending output.
        output: String,
    },

    /// Container is not known to the driver.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for collaborator operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Output of a command executed inside an execution unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code (-1 if killed by a signal).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Resource usage sample for an execution unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitStats {
    /// CPU usage as a percentage of one core.
    pub cpu_percent: f64,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
}

/// Callback receiving log lines as they are produced.
pub type LineSink = Box<dyn Fn(String) + Send + Sync>;

/// Execution-unit collaborator (containers).
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Driver type identifier (e.g., "docker", "mock").
    fn driver_type(&self) -> &'static str;

    /// Create a new base container and return its ID.
    async fn create_base_container(&self) -> AdapterResult<String>;

    /// Host port that `internal_port` of the unit is published on.
    async fn get_exposed_port(&self, unit_id: &str, internal_port: u16) -> AdapterResult<u16>;

    /// Copy the contents of the local directory `src` into `dst` inside the unit.
    async fn copy_files(&self, unit_id: &str, src: &Path, dst: &str) -> AdapterResult<()>;

    /// Run `argv` inside the unit and wait for it to exit.
    ///
    /// A non-zero exit code is reported in the output, not as an error.
    async fn execute_command(
        &self,
        unit_id: &str,
        argv: &[String],
    ) -> AdapterResult<CommandOutput>;

    /// Remove the unit and everything in it.
    async fn remove_container(&self, unit_id: &str) -> AdapterResult<()>;

    /// Forward the unit's log lines to `on_line` until the stream ends.
    ///
    /// For a running unit this normally never returns; callers run it in a
    /// task and abort the task to stop streaming.
    async fn stream_logs(&self, unit_id: &str, on_line: LineSink) -> AdapterResult<()>;

    /// Sample CPU and memory usage of the unit.
    async fn get_stats(&self, unit_id: &str) -> AdapterResult<UnitStats>;
}

/// Source-control collaborator.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Check out `branch` of `source_location` into a fresh local directory.
    async fn clone_repository(
        &self,
        source_location: &str,
        branch: &str,
    ) -> AdapterResult<PathBuf>;

    /// Pin an existing checkout to `revision`.
    ///
    /// Implementations that cannot pin revisions leave the branch head in place.
    async fn checkout_revision(&self, path: &Path, revision: &str) -> AdapterResult<()> {
        let _ = (path, revision);
        Ok(())
    }
}

/// Routing collaborator mapping public hostnames to backends.
#[async_trait]
pub trait Router: Send + Sync {
    /// Route `hostname` to `target_base_url`, replacing any existing route.
    async fn register(&self, hostname: &str, target_base_url: &str) -> AdapterResult<()>;

    /// Remove the route for `hostname`. Unknown hostnames are ignored.
    async fn unregister(&self, hostname: &str) -> AdapterResult<()>;
}
