// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for launchpad-environment.

use thiserror::Error;

use crate::adapters::AdapterError;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Domain or persistence operation failed.
    #[error("Core error: {0}")]
    Core(#[from] launchpad_core::CoreError),

    /// Collaborator (container, git, routing) operation failed.
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A deploy was requested for a rocket without a mission.
    #[error("Rocket {rocket_id} has no mission to deploy")]
    MissingMission {
        /// Rocket that was asked to deploy.
        rocket_id: String,
    },

    /// A deploy step failed.
    #[error("Deployment of rocket {rocket_id} failed during {stage}: {source}")]
    Deployment {
        /// Rocket being deployed.
        rocket_id: String,
        /// Step that failed (e.g. "checkout", "copy").
        stage: &'static str,
        /// Underlying collaborator error.
        #[source]
        source: AdapterError,
    },

    /// Dependency install failed on every registry tried.
    #[error("Dependency install failed for rocket {rocket_id}: {output}")]
    InstallFailed {
        /// Rocket being deployed.
        rocket_id: String,
        /// Installer error output of the last attempt.
        output: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a rocket state-guard violation.
    ///
    /// Guard violations are programming errors and must not be retried.
    pub fn is_guard_violation(&self) -> bool {
        matches!(self, Error::Core(e) if e.is_guard_violation())
    }

    /// Whether this error came out of a deploy.
    pub fn is_deployment_failure(&self) -> bool {
        matches!(
            self,
            Error::MissingMission { .. } | Error::Deployment { .. } | Error::InstallFailed { .. }
        )
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::{CoreError, RocketStatus};

    #[test]
    fn test_guard_violation_classification() {
        let err = Error::from(CoreError::InvalidTransition {
            rocket_id: "r1".to_string(),
            action: "ignite",
            expected: RocketStatus::Preparing,
            actual: RocketStatus::Orbiting,
        });
        assert!(err.is_guard_violation());
        assert!(!err.is_deployment_failure());

        let err = Error::from(CoreError::RocketNotFound("r1".to_string()));
        assert!(!err.is_guard_violation());
    }

    #[test]
    fn test_install_failure_message_carries_output() {
        let err = Error::InstallFailed {
            rocket_id: "r1".to_string(),
            output: "npm ERR! 404".to_string(),
        };
        assert!(err.is_deployment_failure());
        assert!(err.to_string().contains("npm ERR! 404"));
    }
}
