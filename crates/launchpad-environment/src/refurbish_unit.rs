// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Refurbishment of returned rockets.
//!
//! A rocket coming back from a mission is cleaned in place so its container
//! can be reused. Cleanup that fails for any reason scraps the rocket instead:
//! a unit in an unknown state never goes back into the pool.

use std::sync::Arc;

use launchpad_core::{Rocket, RocketRepository, RocketStatus};
use tracing::{debug, info, warn};

use crate::adapters::ContainerDriver;
use crate::error::Result;

/// Shell script run inside the unit to wipe it, with the app directory as `$1`.
///
/// The bracketed process pattern keeps `pkill -f` from matching this shell.
pub const CLEANUP_SCRIPT: &str = r#"set -e
test -n "$1"
rm -rf "$1"/* "$1"/.[!.]* "$1"/..?*
pkill -f '[n]ode|[n]pm' || true
rm -rf /tmp/* /tmp/.[!.]*"#;

/// Argv for running [`CLEANUP_SCRIPT`] against `app_dir`.
pub fn cleanup_argv(app_dir: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        CLEANUP_SCRIPT.to_string(),
        "sh".to_string(),
        app_dir.to_string(),
    ]
}

/// Cleans returned rockets and puts them back into service.
pub struct RefurbishUnit {
    repository: Arc<dyn RocketRepository>,
    driver: Arc<dyn ContainerDriver>,
    app_dir: String,
}

impl RefurbishUnit {
    /// Create a refurbish unit wiping `app_dir` inside each container.
    pub fn new(
        repository: Arc<dyn RocketRepository>,
        driver: Arc<dyn ContainerDriver>,
        app_dir: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            driver,
            app_dir: app_dir.into(),
        }
    }

    /// Refurbish an orbiting rocket, or finish one left refurbishing.
    ///
    /// On success the rocket is `IDLE` with no mission. If cleanup fails the
    /// rocket is `DECOMMISSIONED`, its container removed and its record
    /// deleted. Only guard violations and persistence failures are errors.
    pub async fn refurbish(&self, rocket: &mut Rocket) -> Result<()> {
        // An interrupted refurbishment is resumed from the cleanup step.
        if rocket.status() != RocketStatus::Refurbishing {
            rocket.splash_down()?;
            self.repository.save(rocket).await?;
        }

        let argv = cleanup_argv(&self.app_dir);
        let failure = match self
            .driver
            .execute_command(rocket.container_id(), &argv)
            .await
        {
            Ok(output) if output.success() => None,
            Ok(output) => Some(format!(
                "cleanup exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
            Err(e) => Some(e.to_string()),
        };

        match failure {
            None => {
                rocket.finish_refurbishment()?;
                self.repository.save(rocket).await?;
                info!(rocket_id = %rocket.id(), "Rocket refurbished");
            }
            Some(reason) => {
                warn!(
                    rocket_id = %rocket.id(),
                    container_id = %rocket.container_id(),
                    reason = %reason,
                    "Refurbishment failed, decommissioning rocket"
                );
                teardown(self.repository.as_ref(), self.driver.as_ref(), rocket).await?;
            }
        }

        Ok(())
    }
}

/// Decommission a rocket, remove its container and delete its record.
///
/// Container removal is best-effort; a unit that cannot be removed is
/// logged and forgotten.
pub(crate) async fn teardown(
    repository: &dyn RocketRepository,
    driver: &dyn ContainerDriver,
    rocket: &mut Rocket,
) -> Result<()> {
    if rocket.status() != RocketStatus::Decommissioned {
        rocket.decommission();
    }

    if let Err(e) = driver.remove_container(rocket.container_id()).await {
        warn!(
            rocket_id = %rocket.id(),
            container_id = %rocket.container_id(),
            error = %e,
            "Failed to remove container"
        );
    }

    repository.delete(rocket.id()).await?;
    debug!(rocket_id = %rocket.id(), "Rocket record deleted");
    Ok(())
}
