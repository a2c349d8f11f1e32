// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker keeping the pool healthy.
//!
//! Rockets leave the pool when refurbishment fails or a half-deployed
//! mission is recycled. This worker periodically removes leftover
//! `DECOMMISSIONED` records and tops the pool back up to its target size.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::pool_manager::PoolManager;

/// Configuration for the pool maintainer.
#[derive(Debug, Clone)]
pub struct PoolMaintainerConfig {
    /// Number of rockets the pool is kept at.
    pub pool_size: usize,
    /// How often to run a maintenance cycle.
    pub poll_interval: Duration,
}

impl Default for PoolMaintainerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            poll_interval: Duration::from_secs(60), // 1 minute
        }
    }
}

/// Result of one maintenance cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Decommissioned records removed.
    pub swept: usize,
    /// Rockets created to refill the pool.
    pub created: usize,
}

/// Background worker that sweeps and re-warms the pool.
pub struct PoolMaintainer {
    pool: Arc<PoolManager>,
    config: PoolMaintainerConfig,
    shutdown: Arc<Notify>,
}

impl PoolMaintainer {
    /// Create a new pool maintainer.
    pub fn new(pool: Arc<PoolManager>, config: PoolMaintainerConfig) -> Self {
        Self {
            pool,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the maintenance loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            pool_size = self.config.pool_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Pool maintainer started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Pool maintainer received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Pool maintenance cycle failed");
                    }
                }
            }
        }

        info!("Pool maintainer stopped");
    }

    /// Run a single maintenance cycle.
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let swept = self.pool.sweep_decommissioned().await?;
        let created = self.pool.warmup(self.config.pool_size).await?;

        let report = MaintenanceReport { swept, created };
        if swept > 0 || created > 0 {
            info!(swept, created, "Pool maintenance cycle completed");
        } else {
            debug!("Pool maintenance cycle completed, nothing to do");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockDriver;
    use launchpad_core::{MemoryRepository, RocketRepository};

    fn maintainer(pool_size: usize) -> (PoolMaintainer, Arc<PoolManager>, Arc<MemoryRepository>) {
        let repository = Arc::new(MemoryRepository::new());
        let pool = Arc::new(PoolManager::new(
            repository.clone(),
            Arc::new(MockDriver::new()),
        ));
        let config = PoolMaintainerConfig {
            pool_size,
            poll_interval: Duration::from_millis(100),
        };
        (PoolMaintainer::new(pool.clone(), config), pool, repository)
    }

    #[tokio::test]
    async fn test_run_once_refills_pool() {
        let (maintainer, pool, repository) = maintainer(2);
        pool.warmup(2).await.unwrap();

        let mut rocket = pool.rockets().await.unwrap().remove(0);
        rocket.decommission();
        repository.save(&rocket).await.unwrap();

        let report = maintainer.run_once().await.unwrap();

        assert_eq!(report, MaintenanceReport { swept: 1, created: 1 });
        assert_eq!(pool.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_once_idle_pool() {
        let (maintainer, pool, _) = maintainer(1);
        pool.warmup(1).await.unwrap();

        let report = maintainer.run_once().await.unwrap();
        assert_eq!(report, MaintenanceReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_and_shutdown() {
        let (maintainer, pool, _) = maintainer(3);
        let shutdown = maintainer.shutdown_handle();

        let handle = tokio::spawn(async move { maintainer.run().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pool.size().await.unwrap(), 3);

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("maintainer should stop")
            .unwrap();
    }
}
