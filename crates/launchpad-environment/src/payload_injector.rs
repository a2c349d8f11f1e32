// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payload injector.
//!
//! Deploys a rocket's mission into its container:
//!
//! 1. Check out the mission source into a local staging directory
//! 2. Copy the tree into the container's app directory
//! 3. Point npm at the primary registry and install dependencies, retrying
//!    once against a mirror when no registry override is configured
//! 4. Start the application in the background and ignite the rocket
//!
//! The rocket is left `PREPARING` when any step fails.

use std::path::Path;
use std::sync::Arc;

use launchpad_core::Rocket;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterError, CommandOutput, ContainerDriver, SourceControl};
use crate::error::{Error, Result};

/// Default public npm registry.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Default fallback mirror.
pub const DEFAULT_MIRROR: &str = "https://registry.npmmirror.com";

/// Configuration for the payload injector.
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    /// Application directory inside the container.
    pub app_dir: String,
    /// Registry tried first when no override is set.
    pub primary_registry: String,
    /// Explicit registry. When set it is the only registry tried.
    pub registry_override: Option<String>,
    /// Registry retried once after a failed primary install.
    pub mirror_registry: String,
    /// Command that starts the application, run from `app_dir`.
    pub start_command: String,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            app_dir: "/app".to_string(),
            primary_registry: DEFAULT_REGISTRY.to_string(),
            registry_override: None,
            mirror_registry: DEFAULT_MIRROR.to_string(),
            start_command: "npm start".to_string(),
        }
    }
}

/// Deploys missions into rockets.
pub struct PayloadInjector {
    source: Arc<dyn SourceControl>,
    driver: Arc<dyn ContainerDriver>,
    config: InjectorConfig,
}

impl PayloadInjector {
    /// Create a new injector.
    pub fn new(
        source: Arc<dyn SourceControl>,
        driver: Arc<dyn ContainerDriver>,
        config: InjectorConfig,
    ) -> Self {
        Self {
            source,
            driver,
            config,
        }
    }

    /// Deploy the rocket's mission and ignite it.
    ///
    /// On success the rocket is `ORBITING`. The caller is responsible for
    /// persisting it.
    pub async fn deploy(&self, rocket: &mut Rocket) -> Result<()> {
        let mission = rocket
            .current_mission()
            .cloned()
            .ok_or_else(|| Error::MissingMission {
                rocket_id: rocket.id().to_string(),
            })?;
        let rocket_id = rocket.id().to_string();
        let container_id = rocket.container_id().to_string();

        info!(
            rocket_id = %rocket_id,
            mission_id = %mission.id(),
            repo = %mission.source_location(),
            branch = %mission.branch(),
            "Deploying mission"
        );

        let staged = self
            .source
            .clone_repository(mission.source_location(), mission.branch())
            .await
            .map_err(|source| Error::Deployment {
                rocket_id: rocket_id.clone(),
                stage: "checkout",
                source,
            })?;

        if !mission.revision().is_empty() {
            if let Err(e) = self
                .source
                .checkout_revision(&staged, mission.revision())
                .await
            {
                warn!(
                    rocket_id = %rocket_id,
                    revision = %mission.revision(),
                    error = %e,
                    "Could not pin revision, deploying branch head"
                );
            }
        }

        let copied = self
            .driver
            .copy_files(&container_id, &staged, &self.config.app_dir)
            .await;
        remove_staging(&staged).await;
        copied.map_err(|source| Error::Deployment {
            rocket_id: rocket_id.clone(),
            stage: "copy",
            source,
        })?;

        self.install_dependencies(&rocket_id, &container_id).await?;

        let start = start_argv(&self.config.app_dir, &self.config.start_command);
        let driver = self.driver.clone();
        let start_container = container_id.clone();
        tokio::spawn(async move {
            match driver.execute_command(&start_container, &start).await {
                Ok(output) if !output.success() => {
                    debug!(
                        container_id = %start_container,
                        exit_code = output.exit_code,
                        "Start command exited"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id = %start_container, error = %e, "Start command failed");
                }
            }
        });

        rocket.ignite()?;
        info!(rocket_id = %rocket_id, mission_id = %mission.id(), "Rocket ignited");
        Ok(())
    }

    async fn install_dependencies(&self, rocket_id: &str, container_id: &str) -> Result<()> {
        let primary = self
            .config
            .registry_override
            .as_deref()
            .unwrap_or(&self.config.primary_registry);

        let output = self.install(rocket_id, container_id, primary).await?;
        if output.success() {
            return Ok(());
        }

        if self.config.registry_override.is_some() {
            return Err(Error::InstallFailed {
                rocket_id: rocket_id.to_string(),
                output: installer_output(&output),
            });
        }

        warn!(
            rocket_id = %rocket_id,
            registry = %primary,
            mirror = %self.config.mirror_registry,
            exit_code = output.exit_code,
            "Install failed, retrying against mirror"
        );

        let output = self
            .install(rocket_id, container_id, &self.config.mirror_registry)
            .await?;
        if output.success() {
            return Ok(());
        }

        Err(Error::InstallFailed {
            rocket_id: rocket_id.to_string(),
            output: installer_output(&output),
        })
    }

    async fn install(
        &self,
        rocket_id: &str,
        container_id: &str,
        registry: &str,
    ) -> Result<CommandOutput> {
        let npmrc = self
            .driver
            .execute_command(container_id, &npmrc_argv(&self.config.app_dir, registry))
            .await
            .map_err(|source| deployment_error(rocket_id, "configure registry", source))?;
        if !npmrc.success() {
            return Err(deployment_error(
                rocket_id,
                "configure registry",
                AdapterError::CommandFailed {
                    command: "write .npmrc".to_string(),
                    exit_code: npmrc.exit_code,
                    stderr: npmrc.stderr,
                },
            ));
        }

        debug!(rocket_id = %rocket_id, registry = %registry, "Installing dependencies");
        self.driver
            .execute_command(container_id, &install_argv(&self.config.app_dir, registry))
            .await
            .map_err(|source| deployment_error(rocket_id, "install", source))
    }
}

fn deployment_error(rocket_id: &str, stage: &'static str, source: AdapterError) -> Error {
    Error::Deployment {
        rocket_id: rocket_id.to_string(),
        stage,
        source,
    }
}

async fn remove_staging(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        debug!(path = %path.display(), error = %e, "Failed to remove staging checkout");
    }
}

fn installer_output(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        output.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Argv writing an `.npmrc` that points at `registry`.
pub fn npmrc_argv(app_dir: &str, registry: &str) -> Vec<String> {
    strings(&[
        "sh",
        "-c",
        "printf 'registry=%s\\n' \"$1\" > \"$2\"/.npmrc",
        "sh",
        registry,
        app_dir,
    ])
}

/// Argv installing dependencies from `registry` without scripts or lockfile writes.
pub fn install_argv(app_dir: &str, registry: &str) -> Vec<String> {
    strings(&[
        "npm",
        "install",
        "--prefix",
        app_dir,
        "--ignore-scripts",
        "--no-audit",
        "--no-fund",
        "--package-lock=false",
        "--registry",
        registry,
    ])
}

/// Argv starting the application with its output sent to the container log.
pub fn start_argv(app_dir: &str, start_command: &str) -> Vec<String> {
    strings(&[
        "sh",
        "-c",
        "cd \"$1\" && exec $2 > /proc/1/fd/1 2> /proc/1/fd/2",
        "sh",
        app_dir,
        start_command,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockDriver, MockSourceControl};
    use launchpad_core::{Mission, RocketStatus};

    const MIRROR: &str = "https://mirror.example";

    fn config() -> InjectorConfig {
        InjectorConfig {
            mirror_registry: MIRROR.to_string(),
            ..InjectorConfig::default()
        }
    }

    async fn preparing_rocket(driver: &MockDriver, revision: &str) -> Rocket {
        let container_id = driver.create_base_container().await.unwrap();
        let mut rocket = Rocket::new(container_id);
        rocket
            .assign_mission(Mission::new(
                "pr-7",
                "https://example.com/app.git",
                "feature",
                revision,
            ))
            .unwrap();
        rocket
    }

    fn installs(commands: &[Vec<String>]) -> Vec<String> {
        commands
            .iter()
            .filter(|argv| argv.first().map(String::as_str) == Some("npm"))
            .filter_map(|argv| argv.last().cloned())
            .collect()
    }

    #[test]
    fn test_install_argv_disables_scripts_and_lockfile() {
        let argv = install_argv("/app", DEFAULT_REGISTRY);
        assert!(argv.contains(&"--ignore-scripts".to_string()));
        assert!(argv.contains(&"--package-lock=false".to_string()));
        assert_eq!(argv.last().map(String::as_str), Some(DEFAULT_REGISTRY));
    }

    #[tokio::test]
    async fn test_deploy_ignites() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let driver = Arc::new(MockDriver::new());
        let source = Arc::new(MockSourceControl::with_root(temp_dir.path()));
        let injector = PayloadInjector::new(source.clone(), driver.clone(), config());
        let mut rocket = preparing_rocket(&driver, "abc123").await;

        injector.deploy(&mut rocket).await.unwrap();

        assert_eq!(rocket.status(), RocketStatus::Orbiting);
        assert_eq!(
            source.clones(),
            vec![("https://example.com/app.git".to_string(), "feature".to_string())]
        );
        assert_eq!(source.checkouts().len(), 1);

        let copies = driver.copies(rocket.container_id()).await;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].1, "/app");
        assert!(!copies[0].0.exists(), "staging checkout should be removed");

        let commands = driver.commands(rocket.container_id()).await;
        assert_eq!(commands[0], npmrc_argv("/app", DEFAULT_REGISTRY));
        assert_eq!(installs(&commands), vec![DEFAULT_REGISTRY.to_string()]);
    }

    #[tokio::test]
    async fn test_deploy_without_revision_skips_checkout() {
        let driver = Arc::new(MockDriver::new());
        let source = Arc::new(MockSourceControl::new());
        let injector = PayloadInjector::new(source.clone(), driver.clone(), config());
        let mut rocket = preparing_rocket(&driver, "").await;

        injector.deploy(&mut rocket).await.unwrap();

        assert!(source.checkouts().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_falls_back_to_mirror() {
        let driver = Arc::new(MockDriver::failing_registries([DEFAULT_REGISTRY]));
        let source = Arc::new(MockSourceControl::new());
        let injector = PayloadInjector::new(source, driver.clone(), config());
        let mut rocket = preparing_rocket(&driver, "").await;

        injector.deploy(&mut rocket).await.unwrap();

        assert_eq!(rocket.status(), RocketStatus::Orbiting);
        let commands = driver.commands(rocket.container_id()).await;
        assert_eq!(
            installs(&commands),
            vec![DEFAULT_REGISTRY.to_string(), MIRROR.to_string()]
        );
    }

    #[tokio::test]
    async fn test_deploy_fails_when_mirror_fails() {
        let driver = Arc::new(MockDriver::failing_registries([DEFAULT_REGISTRY, MIRROR]));
        let source = Arc::new(MockSourceControl::new());
        let injector = PayloadInjector::new(source, driver.clone(), config());
        let mut rocket = preparing_rocket(&driver, "").await;

        let err = injector.deploy(&mut rocket).await.unwrap_err();

        match err {
            Error::InstallFailed { output, .. } => assert!(output.contains(MIRROR)),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(rocket.status(), RocketStatus::Preparing);
    }

    #[tokio::test]
    async fn test_deploy_override_disables_fallback() {
        let registry = "https://npm.internal/";
        let driver = Arc::new(MockDriver::failing_registries([registry]));
        let source = Arc::new(MockSourceControl::new());
        let injector = PayloadInjector::new(
            source,
            driver.clone(),
            InjectorConfig {
                registry_override: Some(registry.to_string()),
                ..config()
            },
        );
        let mut rocket = preparing_rocket(&driver, "").await;

        let err = injector.deploy(&mut rocket).await.unwrap_err();

        assert!(matches!(err, Error::InstallFailed { .. }));
        let commands = driver.commands(rocket.container_id()).await;
        assert_eq!(installs(&commands), vec![registry.to_string()]);
    }

    #[tokio::test]
    async fn test_deploy_checkout_failure() {
        let driver = Arc::new(MockDriver::new());
        let source = Arc::new(MockSourceControl::failing());
        let injector = PayloadInjector::new(source, driver.clone(), config());
        let mut rocket = preparing_rocket(&driver, "").await;

        let err = injector.deploy(&mut rocket).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Deployment {
                stage: "checkout",
                ..
            }
        ));
        assert_eq!(rocket.status(), RocketStatus::Preparing);
        assert!(driver.commands(rocket.container_id()).await.is_empty());
    }

    #[tokio::test]
    async fn test_deploy_requires_mission() {
        let driver = Arc::new(MockDriver::new());
        let source = Arc::new(MockSourceControl::new());
        let injector = PayloadInjector::new(source.clone(), driver.clone(), config());
        let mut rocket = Rocket::new(driver.create_base_container().await.unwrap());

        let err = injector.deploy(&mut rocket).await.unwrap_err();

        assert!(matches!(err, Error::MissingMission { .. }));
        assert!(source.clones().is_empty());
    }
}
