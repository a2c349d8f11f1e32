// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git source control via the `git` CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{AdapterError, AdapterResult, SourceControl};

/// Source control backed by the git CLI.
///
/// Every clone lands in a fresh `<staging_root>/<uuid>` directory.
pub struct GitCli {
    staging_root: PathBuf,
}

impl GitCli {
    /// Create a new git adapter staging checkouts under `staging_root`.
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    async fn git(&self, description: &str, args: &[&str]) -> AdapterResult<()> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = ?cmd, "Running git");

        let output = cmd.output().await.map_err(|source| AdapterError::Spawn {
            program: "git",
            source,
        })?;

        if !output.status.success() {
            return Err(AdapterError::CommandFailed {
                command: description.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repository(
        &self,
        source_location: &str,
        branch: &str,
    ) -> AdapterResult<PathBuf> {
        tokio::fs::create_dir_all(&self.staging_root).await?;
        let target = self.staging_root.join(uuid::Uuid::new_v4().to_string());
        let target_str = target.to_string_lossy().into_owned();

        info!(repo = %source_location, branch = %branch, "Cloning repository");

        self.git(
            "git clone",
            &[
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                branch,
                "--",
                source_location,
                &target_str,
            ],
        )
        .await?;

        Ok(target)
    }

    async fn checkout_revision(&self, path: &Path, revision: &str) -> AdapterResult<()> {
        let dir = path.to_string_lossy();

        self.git(
            "git fetch",
            &["-C", &dir, "fetch", "--depth", "1", "origin", revision],
        )
        .await?;
        self.git(
            "git checkout",
            &["-C", &dir, "checkout", "--detach", revision],
        )
        .await?;

        debug!(path = %dir, revision = %revision, "Pinned checkout to revision");
        Ok(())
    }
}
