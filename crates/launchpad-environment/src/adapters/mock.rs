// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock collaborators for testing.
//!
//! Simulate containers and checkouts without docker or git, recording every
//! call so tests can assert on what the engine asked for.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    AdapterError, AdapterResult, CommandOutput, ContainerDriver, LineSink, SourceControl,
    UnitStats,
};
use crate::refurbish_unit::CLEANUP_SCRIPT;

/// Mock container state.
#[derive(Debug, Clone, Default)]
struct MockContainer {
    port: u16,
    commands: Vec<Vec<String>>,
    copies: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default)]
struct MockState {
    created: u64,
    containers: HashMap<String, MockContainer>,
    removed: Vec<String>,
}

/// Mock container driver.
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    /// Install attempts against these registries exit non-zero.
    pub failing_registries: HashSet<String>,
    /// If true, the refurbishment cleanup command exits non-zero.
    pub fail_cleanup: bool,
    /// If true, container creation fails.
    pub fail_create: bool,
    /// Lines replayed by `stream_logs` before it idles forever.
    pub log_lines: Vec<String>,
    /// Stats returned by `get_stats`.
    pub stats: UnitStats,
    /// Host port of the first container; later containers count up from it.
    pub base_port: u16,
    /// How long each executed command takes.
    pub command_delay: Duration,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a mock driver where every operation succeeds.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            failing_registries: HashSet::new(),
            fail_cleanup: false,
            fail_create: false,
            log_lines: vec!["> app@1.0.0 start".to_string(), "listening on 3000".to_string()],
            stats: UnitStats {
                cpu_percent: 1.5,
                memory_bytes: 64 * 1024 * 1024,
            },
            base_port: 49_000,
            command_delay: Duration::ZERO,
        }
    }

    /// Create a mock driver whose cleanup command always fails.
    pub fn failing_cleanup() -> Self {
        Self {
            fail_cleanup: true,
            ..Self::new()
        }
    }

    /// Create a mock driver where installs against `registries` fail.
    pub fn failing_registries<I, S>(registries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing_registries: registries.into_iter().map(Into::into).collect(),
            ..Self::new()
        }
    }

    /// Number of containers created so far.
    pub async fn created_count(&self) -> u64 {
        self.state.lock().await.created
    }

    /// IDs of containers that are still alive.
    pub async fn live_containers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<_> = state.containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// IDs of containers removed so far, in removal order.
    pub async fn removed(&self) -> Vec<String> {
        self.state.lock().await.removed.clone()
    }

    /// Commands executed in a container, in order.
    pub async fn commands(&self, unit_id: &str) -> Vec<Vec<String>> {
        let state = self.state.lock().await;
        state
            .containers
            .get(unit_id)
            .map(|c| c.commands.clone())
            .unwrap_or_default()
    }

    /// `(src, dst)` pairs copied into a container, in order.
    pub async fn copies(&self, unit_id: &str) -> Vec<(PathBuf, String)> {
        let state = self.state.lock().await;
        state
            .containers
            .get(unit_id)
            .map(|c| c.copies.clone())
            .unwrap_or_default()
    }

    fn run(&self, argv: &[String]) -> CommandOutput {
        let program = argv.first().map(String::as_str);

        if program == Some("npm") && argv.get(1).map(String::as_str) == Some("install") {
            let registry = argv
                .iter()
                .position(|a| a == "--registry")
                .and_then(|i| argv.get(i + 1))
                .cloned()
                .unwrap_or_default();

            if self.failing_registries.contains(&registry) {
                return CommandOutput {
                    stdout: String::new(),
                    stderr: format!("npm ERR! network request to {registry} failed"),
                    exit_code: 1,
                };
            }
            return CommandOutput {
                stdout: "added 42 packages".to_string(),
                ..CommandOutput::default()
            };
        }

        if argv.get(2).map(String::as_str) == Some(CLEANUP_SCRIPT) && self.fail_cleanup {
            return CommandOutput {
                stdout: String::new(),
                stderr: "rm: can't remove '/app/node_modules': Device or resource busy".to_string(),
                exit_code: 1,
            };
        }

        CommandOutput::default()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    async fn create_base_container(&self) -> AdapterResult<String> {
        if self.fail_create {
            return Err(AdapterError::Other("Mock create failure".to_string()));
        }

        let mut state = self.state.lock().await;
        let index = state.created;
        state.created += 1;

        let container_id = format!("mock-container-{index}");
        state.containers.insert(
            container_id.clone(),
            MockContainer {
                port: self.base_port.saturating_add(index as u16),
                ..MockContainer::default()
            },
        );
        Ok(container_id)
    }

    async fn get_exposed_port(&self, unit_id: &str, _internal_port: u16) -> AdapterResult<u16> {
        let state = self.state.lock().await;
        state
            .containers
            .get(unit_id)
            .map(|c| c.port)
            .ok_or_else(|| AdapterError::ContainerNotFound(unit_id.to_string()))
    }

    async fn copy_files(&self, unit_id: &str, src: &Path, dst: &str) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(unit_id)
            .ok_or_else(|| AdapterError::ContainerNotFound(unit_id.to_string()))?;
        container.copies.push((src.to_path_buf(), dst.to_string()));
        Ok(())
    }

    async fn execute_command(
        &self,
        unit_id: &str,
        argv: &[String],
    ) -> AdapterResult<CommandOutput> {
        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }
        let output = self.run(argv);

        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(unit_id)
            .ok_or_else(|| AdapterError::ContainerNotFound(unit_id.to_string()))?;
        container.commands.push(argv.to_vec());
        Ok(output)
    }

    async fn remove_container(&self, unit_id: &str) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        if state.containers.remove(unit_id).is_none() {
            return Err(AdapterError::ContainerNotFound(unit_id.to_string()));
        }
        state.removed.push(unit_id.to_string());
        Ok(())
    }

    async fn stream_logs(&self, unit_id: &str, on_line: LineSink) -> AdapterResult<()> {
        if !self.state.lock().await.containers.contains_key(unit_id) {
            return Err(AdapterError::ContainerNotFound(unit_id.to_string()));
        }

        for line in &self.log_lines {
            on_line(line.clone());
        }

        std::future::pending::<()>().await;
        Ok(())
    }

    async fn get_stats(&self, unit_id: &str) -> AdapterResult<UnitStats> {
        if !self.state.lock().await.containers.contains_key(unit_id) {
            return Err(AdapterError::ContainerNotFound(unit_id.to_string()));
        }
        Ok(self.stats)
    }
}

/// Mock source control.
///
/// Each clone creates an empty directory under `root` so callers can
/// exercise staging cleanup.
pub struct MockSourceControl {
    root: PathBuf,
    counter: AtomicU64,
    clones: std::sync::Mutex<Vec<(String, String)>>,
    checkouts: std::sync::Mutex<Vec<(PathBuf, String)>>,
    /// If true, clones fail.
    pub fail: bool,
}

impl Default for MockSourceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSourceControl {
    /// Create a mock that stages checkouts under the system temp directory.
    pub fn new() -> Self {
        Self::with_root(
            std::env::temp_dir().join(format!("launchpad-mock-{}", uuid::Uuid::new_v4())),
        )
    }

    /// Create a mock that stages checkouts under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
            clones: std::sync::Mutex::new(Vec::new()),
            checkouts: std::sync::Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Create a mock whose clones always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// `(source_location, branch)` pairs cloned so far.
    pub fn clones(&self) -> Vec<(String, String)> {
        self.clones
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// `(path, revision)` pairs pinned so far.
    pub fn checkouts(&self) -> Vec<(PathBuf, String)> {
        self.checkouts
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SourceControl for MockSourceControl {
    async fn clone_repository(
        &self,
        source_location: &str,
        branch: &str,
    ) -> AdapterResult<PathBuf> {
        if self.fail {
            return Err(AdapterError::CommandFailed {
                command: "git clone".to_string(),
                exit_code: 128,
                stderr: format!("fatal: repository '{source_location}' not found"),
            });
        }

        if let Ok(mut clones) = self.clones.lock() {
            clones.push((source_location.to_string(), branch.to_string()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.root.join(format!("checkout-{n}"));
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    async fn checkout_revision(&self, path: &Path, revision: &str) -> AdapterResult<()> {
        if let Ok(mut checkouts) = self.checkouts.lock() {
            checkouts.push((path.to_path_buf(), revision.to_string()));
        }
        Ok(())
    }
}
