// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for launchpad.
//!
//! [`LaunchpadRuntime`] wires a repository and the collaborator adapters into
//! a pool manager, payload injector, refurbish unit and mission control,
//! warms the pool and keeps it maintained in the background.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use launchpad_core::SqliteRepository;
//! use launchpad_environment::adapters::{DockerCli, GitCli, RouteTable};
//! use launchpad_environment::runtime::LaunchpadRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repository = Arc::new(SqliteRepository::from_path("rockets.db").await?);
//!
//!     let runtime = LaunchpadRuntime::builder()
//!         .repository(repository)
//!         .driver(Arc::new(DockerCli::new(Default::default())))
//!         .source_control(Arc::new(GitCli::new("/tmp/launchpad")))
//!         .router(Arc::new(RouteTable::new()))
//!         .pool_size(4)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let sink = Arc::new(|event| println!("{event:?}"));
//!     let mission = launchpad_core::Mission::for_pull_request(
//!         42, "https://github.com/acme/web.git", "feature/login", "",
//!     );
//!     runtime.mission_control().launch(mission, sink).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use launchpad_core::RocketRepository;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{ContainerDriver, Router, SourceControl};
use crate::config::Config;
use crate::mission_control::{MissionControl, MissionControlConfig};
use crate::payload_injector::{InjectorConfig, PayloadInjector};
use crate::pool_maintainer::{PoolMaintainer, PoolMaintainerConfig};
use crate::pool_manager::PoolManager;
use crate::refurbish_unit::RefurbishUnit;

/// Builder for creating a [`LaunchpadRuntime`].
pub struct LaunchpadRuntimeBuilder {
    repository: Option<Arc<dyn RocketRepository>>,
    driver: Option<Arc<dyn ContainerDriver>>,
    source_control: Option<Arc<dyn SourceControl>>,
    router: Option<Arc<dyn Router>>,
    pool_size: usize,
    maintenance_interval: Duration,
    injector: InjectorConfig,
    mission_control: MissionControlConfig,
}

impl Default for LaunchpadRuntimeBuilder {
    fn default() -> Self {
        Self {
            repository: None,
            driver: None,
            source_control: None,
            router: None,
            pool_size: 2,
            maintenance_interval: Duration::from_secs(60), // 1 minute
            injector: InjectorConfig::default(),
            mission_control: MissionControlConfig::default(),
        }
    }
}

impl LaunchpadRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rocket repository (required).
    pub fn repository(mut self, repository: Arc<dyn RocketRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Set the container driver (required).
    pub fn driver(mut self, driver: Arc<dyn ContainerDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Set the source control adapter (required).
    pub fn source_control(mut self, source_control: Arc<dyn SourceControl>) -> Self {
        self.source_control = Some(source_control);
        self
    }

    /// Set the router that mission hostnames are registered with.
    ///
    /// Default: none (missions are reachable by port only)
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Set the number of rockets kept warm.
    ///
    /// Default: 2
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the pool maintainer interval.
    ///
    /// Default: 1 minute
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the application directory inside containers.
    ///
    /// Default: `/app`
    pub fn app_dir(mut self, app_dir: impl Into<String>) -> Self {
        self.injector.app_dir = app_dir.into();
        self
    }

    /// Set the application port inside containers.
    ///
    /// Default: 3000
    pub fn app_port(mut self, port: u16) -> Self {
        self.mission_control.internal_port = port;
        self
    }

    /// Set the domain mission hostnames are created under.
    ///
    /// Default: `preview.localhost`
    pub fn base_domain(mut self, domain: impl Into<String>) -> Self {
        self.mission_control.base_domain = domain.into();
        self
    }

    /// Install dependencies only from `registry`, with no mirror fallback.
    pub fn registry_override(mut self, registry: impl Into<String>) -> Self {
        self.injector.registry_override = Some(registry.into());
        self
    }

    /// Set the mirror retried after a failed install.
    ///
    /// Default: `https://registry.npmmirror.com`
    pub fn mirror_registry(mut self, registry: impl Into<String>) -> Self {
        self.injector.mirror_registry = registry.into();
        self
    }

    /// Set how long missions stay in flight.
    ///
    /// Default: 10 minutes
    pub fn mission_ttl(mut self, ttl: Duration) -> Self {
        self.mission_control.mission_ttl = ttl;
        self
    }

    /// Set the stats poll period.
    ///
    /// Default: 5 seconds
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.mission_control.stats_interval = interval;
        self
    }

    /// Apply every tunable from a loaded [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.pool_size = config.pool_size;
        self.maintenance_interval = config.maintenance_interval;
        self.injector.app_dir = config.app_dir.clone();
        self.injector.registry_override = config.npm_registry.clone();
        self.injector.mirror_registry = config.npm_mirror.clone();
        self.mission_control.internal_port = config.app_port;
        self.mission_control.base_domain = config.base_domain.clone();
        self.mission_control.mission_ttl = config.mission_ttl;
        self.mission_control.stats_interval = config.stats_interval;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<LaunchpadRuntimeConfig> {
        let repository = self
            .repository
            .ok_or_else(|| anyhow::anyhow!("repository is required"))?;
        let driver = self
            .driver
            .ok_or_else(|| anyhow::anyhow!("driver is required"))?;
        let source_control = self
            .source_control
            .ok_or_else(|| anyhow::anyhow!("source_control is required"))?;

        Ok(LaunchpadRuntimeConfig {
            repository,
            driver,
            source_control,
            router: self.router,
            pool_size: self.pool_size,
            maintenance_interval: self.maintenance_interval,
            injector: self.injector,
            mission_control: self.mission_control,
        })
    }
}

/// Configuration for a [`LaunchpadRuntime`].
pub struct LaunchpadRuntimeConfig {
    repository: Arc<dyn RocketRepository>,
    driver: Arc<dyn ContainerDriver>,
    source_control: Arc<dyn SourceControl>,
    router: Option<Arc<dyn Router>>,
    pool_size: usize,
    maintenance_interval: Duration,
    injector: InjectorConfig,
    mission_control: MissionControlConfig,
}

impl LaunchpadRuntimeConfig {
    /// Start the runtime: warm the pool and spawn the pool maintainer.
    pub async fn start(self) -> Result<LaunchpadRuntime> {
        let refurbisher = Arc::new(RefurbishUnit::new(
            self.repository.clone(),
            self.driver.clone(),
            self.injector.app_dir.clone(),
        ));
        let pool = Arc::new(
            PoolManager::new(self.repository.clone(), self.driver.clone())
                .with_refurbisher(refurbisher),
        );
        let injector = Arc::new(PayloadInjector::new(
            self.source_control.clone(),
            self.driver.clone(),
            self.injector,
        ));

        let mut mission_control = MissionControl::new(
            pool.clone(),
            injector,
            self.driver.clone(),
            self.mission_control,
        );
        if let Some(router) = self.router {
            mission_control = mission_control.with_router(router);
        }

        let maintainer = PoolMaintainer::new(
            pool.clone(),
            PoolMaintainerConfig {
                pool_size: self.pool_size,
                poll_interval: self.maintenance_interval,
            },
        );

        // First cycle runs inline so the pool is warm before the first launch.
        match maintainer.run_once().await {
            Ok(report) => info!(
                swept = report.swept,
                created = report.created,
                pool_size = self.pool_size,
                "Pool warmed up"
            ),
            Err(e) => warn!(error = %e, "Initial pool warmup failed, maintainer will retry"),
        }
        let maintainer_shutdown = maintainer.shutdown_handle();
        let maintainer_handle = tokio::spawn(async move {
            maintainer.run().await;
        });

        info!(
            driver = self.driver.driver_type(),
            pool_size = self.pool_size,
            "LaunchpadRuntime started"
        );

        Ok(LaunchpadRuntime {
            mission_control,
            pool,
            maintainer_handle,
            maintainer_shutdown,
        })
    }
}

/// A running launchpad instance that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct LaunchpadRuntime {
    mission_control: MissionControl,
    pool: Arc<PoolManager>,
    maintainer_handle: JoinHandle<()>,
    maintainer_shutdown: Arc<Notify>,
}

impl LaunchpadRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> LaunchpadRuntimeBuilder {
        LaunchpadRuntimeBuilder::new()
    }

    /// Mission control for launching and recycling missions.
    pub fn mission_control(&self) -> &MissionControl {
        &self.mission_control
    }

    /// The rocket pool.
    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops telemetry for every mission in flight and the pool maintainer.
    /// Rockets and their containers are left as they are.
    pub async fn shutdown(self) -> Result<()> {
        info!("LaunchpadRuntime shutting down...");

        self.mission_control.shutdown().await;
        self.maintainer_shutdown.notify_one();

        if let Err(e) = self.maintainer_handle.await {
            error!("Pool maintainer task panicked: {}", e);
        }

        info!("LaunchpadRuntime shutdown complete");
        Ok(())
    }
}
