// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for the rocket inventory.
//!
//! Repositories store rocket snapshots only; pending domain events stay on
//! the in-memory [`Rocket`] handed back to the caller.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryRepository;
pub use self::sqlite::SqliteRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::mission::Mission;
use crate::rocket::Rocket;

/// Storage for the rocket inventory.
///
/// The repository is the single source of truth for pool membership.
#[async_trait]
pub trait RocketRepository: Send + Sync {
    /// Insert or replace a rocket.
    async fn save(&self, rocket: &Rocket) -> Result<()>;

    /// Look up a rocket by ID.
    async fn find_by_id(&self, id: &str) -> Result<Option<Rocket>>;

    /// Return the first idle rocket, if any.
    ///
    /// This is a plain read; use [`claim_idle`](Self::claim_idle) to reserve one.
    async fn find_idle(&self) -> Result<Option<Rocket>>;

    /// Return every rocket in the inventory.
    async fn find_all(&self) -> Result<Vec<Rocket>>;

    /// Remove a rocket from the inventory. Removing an unknown ID is a no-op.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Atomically find an idle rocket, assign `mission` to it and persist it.
    ///
    /// Returns the claimed rocket with its `MissionAssigned` event still
    /// pending, or `None` when no idle rocket exists. Two concurrent callers
    /// never receive the same rocket.
    async fn claim_idle(&self, mission: &Mission) -> Result<Option<Rocket>>;

    /// Find the rocket currently bound to `mission_id`.
    async fn find_by_mission(&self, mission_id: &str) -> Result<Option<Rocket>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .find(|r| r.current_mission().is_some_and(|m| m.id() == mission_id)))
    }

    /// Number of rockets in the inventory.
    async fn count(&self) -> Result<usize> {
        Ok(self.find_all().await?.len())
    }
}
