// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for launchpad-core.

use thiserror::Error;

use crate::rocket::RocketStatus;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A lifecycle transition was attempted from the wrong status.
    #[error("Rocket {rocket_id}: cannot {action} while {actual} (expected {expected})")]
    InvalidTransition {
        /// The rocket the transition was attempted on.
        rocket_id: String,
        /// The transition that was attempted.
        action: &'static str,
        /// The status the transition requires.
        expected: RocketStatus,
        /// The status the rocket was actually in.
        actual: RocketStatus,
    },

    /// A persisted snapshot violates the rocket invariants.
    #[error("Invalid rocket snapshot {rocket_id}: {reason}")]
    InvalidSnapshot {
        /// The rocket ID from the snapshot.
        rocket_id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A status string could not be parsed.
    #[error("Unknown rocket status: {0}")]
    UnknownStatus(String),

    /// Rocket was not found.
    #[error("Rocket not found: {0}")]
    RocketNotFound(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether this error is a lifecycle guard violation.
    ///
    /// Guard violations indicate a logic bug in the caller and are never retried.
    pub fn is_guard_violation(&self) -> bool {
        matches!(self, CoreError::InvalidTransition { .. })
    }
}
