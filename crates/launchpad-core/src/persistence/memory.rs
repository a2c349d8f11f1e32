// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory rocket repository.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::mission::Mission;
use crate::rocket::{Rocket, RocketSnapshot, RocketStatus};

use super::RocketRepository;

/// In-memory rocket repository.
///
/// Snapshots are kept in insertion order so "first idle" is deterministic.
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    rockets: RwLock<Vec<RocketSnapshot>>,
}

impl MemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RocketRepository for MemoryRepository {
    async fn save(&self, rocket: &Rocket) -> Result<()> {
        let snapshot = rocket.to_snapshot();
        let mut rockets = self.rockets.write().await;

        match rockets.iter_mut().find(|r| r.id == snapshot.id) {
            Some(existing) => *existing = snapshot,
            None => rockets.push(snapshot),
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Rocket>> {
        let rockets = self.rockets.read().await;
        rockets
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(Rocket::from_snapshot)
            .transpose()
    }

    async fn find_idle(&self) -> Result<Option<Rocket>> {
        let rockets = self.rockets.read().await;
        rockets
            .iter()
            .find(|r| r.status == RocketStatus::Idle)
            .cloned()
            .map(Rocket::from_snapshot)
            .transpose()
    }

    async fn find_all(&self) -> Result<Vec<Rocket>> {
        let rockets = self.rockets.read().await;
        rockets.iter().cloned().map(Rocket::from_snapshot).collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.rockets.write().await.retain(|r| r.id != id);
        Ok(())
    }

    async fn claim_idle(&self, mission: &Mission) -> Result<Option<Rocket>> {
        // Write lock held across find + transition + store.
        let mut rockets = self.rockets.write().await;

        let Some(slot) = rockets.iter_mut().find(|r| r.status == RocketStatus::Idle) else {
            return Ok(None);
        };

        let mut rocket = Rocket::from_snapshot(slot.clone())?;
        rocket.assign_mission(mission.clone())?;
        *slot = rocket.to_snapshot();

        Ok(Some(rocket))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rockets.read().await.len())
    }
}
