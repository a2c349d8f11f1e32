// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool manager.
//!
//! Owns the standing inventory of rockets and mediates every assignment and
//! return. All repository writes outside of refurbishment go through here,
//! and every domain event recorded by a transition is drained and published
//! to subscribers.

use std::collections::HashSet;
use std::sync::Arc;

use launchpad_core::{CoreError, Mission, Rocket, RocketEvent, RocketRepository, RocketStatus};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::adapters::ContainerDriver;
use crate::error::Result;
use crate::refurbish_unit::{RefurbishUnit, teardown};

/// Capacity of the domain event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Keeps a warm pool of rockets and hands them out to missions.
pub struct PoolManager {
    repository: Arc<dyn RocketRepository>,
    driver: Arc<dyn ContainerDriver>,
    refurbisher: Option<Arc<RefurbishUnit>>,
    events: broadcast::Sender<RocketEvent>,
    warmup_lock: Mutex<()>,
    recycling: std::sync::Mutex<HashSet<String>>,
}

impl PoolManager {
    /// Create a pool manager without a refurbish unit.
    ///
    /// Without one, recycled rockets skip container cleanup and go straight
    /// back to `IDLE`.
    pub fn new(repository: Arc<dyn RocketRepository>, driver: Arc<dyn ContainerDriver>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            repository,
            driver,
            refurbisher: None,
            events,
            warmup_lock: Mutex::new(()),
            recycling: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Use `refurbisher` to clean recycled rockets.
    pub fn with_refurbisher(mut self, refurbisher: Arc<RefurbishUnit>) -> Self {
        self.refurbisher = Some(refurbisher);
        self
    }

    /// Subscribe to rocket domain events.
    pub fn subscribe(&self) -> broadcast::Receiver<RocketEvent> {
        self.events.subscribe()
    }

    /// Ensure at least `count` rockets exist, creating idle ones as needed.
    ///
    /// Returns the number of rockets created. Never removes rockets.
    pub async fn warmup(&self, count: usize) -> Result<usize> {
        let _guard = self.warmup_lock.lock().await;

        let size = self.repository.count().await?;
        let needed = count.saturating_sub(size);
        if needed == 0 {
            debug!(size, target = count, "Pool already warm");
            return Ok(0);
        }

        info!(size, target = count, needed, "Warming up pool");

        for _ in 0..needed {
            let container_id = self.driver.create_base_container().await?;
            let rocket = Rocket::new(container_id);
            self.repository.save(&rocket).await?;
            debug!(
                rocket_id = %rocket.id(),
                container_id = %rocket.container_id(),
                "Rocket added to pool"
            );
        }

        Ok(needed)
    }

    /// Bind `mission` to an idle rocket, creating one if the pool is empty.
    ///
    /// The returned rocket is `PREPARING` and already persisted.
    pub async fn assign_mission(&self, mission: Mission) -> Result<Rocket> {
        let mission_id = mission.id().to_string();

        let mut rocket = match self.repository.claim_idle(&mission).await? {
            Some(rocket) => rocket,
            None => {
                info!(mission_id = %mission_id, "No idle rocket, creating one on demand");
                let container_id = self.driver.create_base_container().await?;
                let mut rocket = Rocket::new(container_id);
                rocket.assign_mission(mission)?;
                self.repository.save(&rocket).await?;
                rocket
            }
        };

        info!(
            rocket_id = %rocket.id(),
            mission_id = %mission_id,
            "Mission assigned"
        );
        self.publish(&mut rocket);
        Ok(rocket)
    }

    /// Return the rocket serving `mission_id` to the pool.
    ///
    /// Returns the rocket in its final state, or `None` if no rocket carries
    /// the mission or it is already being recycled. Calling this twice for
    /// the same mission is harmless.
    pub async fn recycle(&self, mission_id: &str) -> Result<Option<Rocket>> {
        let Some(_claim) = RecycleClaim::acquire(&self.recycling, mission_id)? else {
            debug!(mission_id = %mission_id, "Mission already being recycled");
            return Ok(None);
        };

        self.recycle_inner(mission_id).await
    }

    async fn recycle_inner(&self, mission_id: &str) -> Result<Option<Rocket>> {
        let Some(mut rocket) = self.repository.find_by_mission(mission_id).await? else {
            info!(mission_id = %mission_id, "No rocket carries mission, nothing to recycle");
            return Ok(None);
        };

        match rocket.status() {
            // Refurbishing here means an earlier recycle was interrupted.
            RocketStatus::Orbiting | RocketStatus::Refurbishing => {
                if let Some(refurbisher) = &self.refurbisher {
                    let result = refurbisher.refurbish(&mut rocket).await;
                    self.publish(&mut rocket);
                    result?;
                } else {
                    if rocket.status() == RocketStatus::Orbiting {
                        rocket.splash_down()?;
                    }
                    rocket.finish_refurbishment()?;
                    self.repository.save(&rocket).await?;
                    self.publish(&mut rocket);
                }
            }
            RocketStatus::Preparing => {
                warn!(
                    rocket_id = %rocket.id(),
                    mission_id = %mission_id,
                    "Recycling a rocket that never reached orbit, decommissioning"
                );
                teardown(self.repository.as_ref(), self.driver.as_ref(), &mut rocket).await?;
                self.publish(&mut rocket);
            }
            status => {
                debug!(
                    rocket_id = %rocket.id(),
                    mission_id = %mission_id,
                    status = %status,
                    "Rocket not recyclable in its current status"
                );
                return Ok(None);
            }
        }

        info!(
            rocket_id = %rocket.id(),
            mission_id = %mission_id,
            status = %rocket.status(),
            "Mission recycled"
        );
        Ok(Some(rocket))
    }

    /// Persist changes made to `rocket` outside the pool and publish its events.
    pub async fn commit(&self, rocket: &mut Rocket) -> Result<()> {
        self.repository.save(rocket).await?;
        self.publish(rocket);
        Ok(())
    }

    /// Take a rocket out of service, removing its container.
    pub async fn decommission(&self, rocket_id: &str) -> Result<Rocket> {
        let mut rocket = self
            .repository
            .find_by_id(rocket_id)
            .await?
            .ok_or_else(|| CoreError::RocketNotFound(rocket_id.to_string()))?;

        teardown(self.repository.as_ref(), self.driver.as_ref(), &mut rocket).await?;
        self.publish(&mut rocket);

        info!(rocket_id = %rocket_id, "Rocket decommissioned");
        Ok(rocket)
    }

    /// Remove leftover `DECOMMISSIONED` records and their containers.
    ///
    /// Returns the number of records removed.
    pub async fn sweep_decommissioned(&self) -> Result<usize> {
        let mut swept = 0;

        for mut rocket in self.repository.find_all().await? {
            if rocket.status() != RocketStatus::Decommissioned {
                continue;
            }
            teardown(self.repository.as_ref(), self.driver.as_ref(), &mut rocket).await?;
            swept += 1;
        }

        if swept > 0 {
            info!(swept, "Swept decommissioned rockets");
        }
        Ok(swept)
    }

    /// Look up a rocket by id.
    pub async fn rocket(&self, rocket_id: &str) -> Result<Option<Rocket>> {
        Ok(self.repository.find_by_id(rocket_id).await?)
    }

    /// All rockets in the pool.
    pub async fn rockets(&self) -> Result<Vec<Rocket>> {
        Ok(self.repository.find_all().await?)
    }

    /// Number of rockets in the pool, busy or not.
    pub async fn size(&self) -> Result<usize> {
        Ok(self.repository.count().await?)
    }

    fn publish(&self, rocket: &mut Rocket) {
        for event in rocket.pull_domain_events() {
            debug!(rocket_id = %event.rocket_id, event = ?event.kind, "Rocket event");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

/// Marks a mission as being recycled until dropped.
struct RecycleClaim<'a> {
    recycling: &'a std::sync::Mutex<HashSet<String>>,
    mission_id: String,
}

impl<'a> RecycleClaim<'a> {
    /// Returns `None` if the mission is already claimed.
    fn acquire(
        recycling: &'a std::sync::Mutex<HashSet<String>>,
        mission_id: &str,
    ) -> Result<Option<Self>> {
        let mut set = recycling
            .lock()
            .map_err(|_| crate::error::Error::Other("recycle set poisoned".to_string()))?;
        if !set.insert(mission_id.to_string()) {
            return Ok(None);
        }
        Ok(Some(Self {
            recycling,
            mission_id: mission_id.to_string(),
        }))
    }
}

impl Drop for RecycleClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.recycling.lock() {
            set.remove(&self.mission_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockDriver;
    use std::time::Duration;
    use launchpad_core::{MemoryRepository, RocketEventKind};

    fn mission(id: &str) -> Mission {
        Mission::new(id, "https://example.com/app.git", "main", "")
    }

    fn pool(driver: Arc<MockDriver>) -> (PoolManager, Arc<MemoryRepository>) {
        let repository = Arc::new(MemoryRepository::new());
        (PoolManager::new(repository.clone(), driver), repository)
    }

    #[tokio::test]
    async fn test_warmup_creates_idle_rockets() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver.clone());

        assert_eq!(pool.warmup(2).await.unwrap(), 2);

        let rockets = pool.rockets().await.unwrap();
        assert_eq!(rockets.len(), 2);
        assert!(rockets.iter().all(|r| r.status() == RocketStatus::Idle));
        assert_eq!(driver.created_count().await, 2);
    }

    #[tokio::test]
    async fn test_warmup_never_shrinks() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver.clone());

        pool.warmup(3).await.unwrap();
        assert_eq!(pool.warmup(1).await.unwrap(), 0);
        assert_eq!(pool.warmup(3).await.unwrap(), 0);
        assert_eq!(pool.size().await.unwrap(), 3);

        assert_eq!(pool.warmup(4).await.unwrap(), 1);
        assert_eq!(pool.size().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_assign_mission_claims_idle_rocket() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver.clone());
        pool.warmup(2).await.unwrap();

        let rocket = pool.assign_mission(mission("pr-1")).await.unwrap();

        assert_eq!(rocket.status(), RocketStatus::Preparing);
        assert_eq!(rocket.current_mission().map(|m| m.id()), Some("pr-1"));
        assert_eq!(pool.size().await.unwrap(), 2);
        assert_eq!(driver.created_count().await, 2);
    }

    #[tokio::test]
    async fn test_assign_mission_grows_empty_pool() {
        let driver = Arc::new(MockDriver::new());
        let (pool, repository) = pool(driver.clone());

        let rocket = pool.assign_mission(mission("pr-1")).await.unwrap();

        assert_eq!(driver.created_count().await, 1);
        let stored = repository.find_by_id(rocket.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RocketStatus::Preparing);
    }

    #[tokio::test]
    async fn test_assign_mission_create_failure() {
        let mut driver = MockDriver::new();
        driver.fail_create = true;
        let (pool, _) = pool(Arc::new(driver));

        assert!(pool.assign_mission(mission("pr-1")).await.is_err());
        assert_eq!(pool.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recycle_without_refurbisher() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver);
        pool.warmup(1).await.unwrap();

        let mut rocket = pool.assign_mission(mission("pr-1")).await.unwrap();
        rocket.ignite().unwrap();
        pool.commit(&mut rocket).await.unwrap();

        let recycled = pool.recycle("pr-1").await.unwrap().unwrap();
        assert_eq!(recycled.status(), RocketStatus::Idle);
        assert!(recycled.current_mission().is_none());

        // Second call is a no-op.
        assert!(pool.recycle("pr-1").await.unwrap().is_none());
        assert_eq!(pool.size().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_recycle_can_be_retried() {
        let mut driver = MockDriver::new();
        driver.command_delay = Duration::from_secs(30);
        let driver = Arc::new(driver);
        let repository = Arc::new(MemoryRepository::new());
        let refurbisher = Arc::new(RefurbishUnit::new(
            repository.clone(),
            driver.clone(),
            "/app",
        ));
        let pool = PoolManager::new(repository, driver).with_refurbisher(refurbisher);
        pool.warmup(1).await.unwrap();

        let mut rocket = pool.assign_mission(mission("pr-1")).await.unwrap();
        rocket.ignite().unwrap();
        pool.commit(&mut rocket).await.unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), pool.recycle("pr-1")).await;
        assert!(cancelled.is_err(), "recycle should still be refurbishing");

        let recycled = pool.recycle("pr-1").await.unwrap().unwrap();
        assert_eq!(recycled.status(), RocketStatus::Idle);
        assert!(recycled.current_mission().is_none());
    }

    #[tokio::test]
    async fn test_recycle_unknown_mission_is_noop() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver);
        pool.warmup(1).await.unwrap();

        assert!(pool.recycle("pr-404").await.unwrap().is_none());
        assert_eq!(pool.rockets().await.unwrap()[0].status(), RocketStatus::Idle);
    }

    #[tokio::test]
    async fn test_recycle_preparing_decommissions() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver.clone());
        pool.warmup(1).await.unwrap();

        let rocket = pool.assign_mission(mission("pr-1")).await.unwrap();
        let recycled = pool.recycle("pr-1").await.unwrap().unwrap();

        assert_eq!(recycled.status(), RocketStatus::Decommissioned);
        assert_eq!(pool.size().await.unwrap(), 0);
        assert_eq!(driver.removed().await, vec![rocket.container_id().to_string()]);
    }

    #[tokio::test]
    async fn test_decommission_unknown_rocket() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver);

        let err = pool.decommission("missing").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Core(CoreError::RocketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_decommissioned() {
        let driver = Arc::new(MockDriver::new());
        let (pool, repository) = pool(driver.clone());
        pool.warmup(2).await.unwrap();

        let mut rocket = pool.rockets().await.unwrap().remove(0);
        rocket.decommission();
        repository.save(&rocket).await.unwrap();

        assert_eq!(pool.sweep_decommissioned().await.unwrap(), 1);
        assert_eq!(pool.size().await.unwrap(), 1);
        assert_eq!(driver.removed().await, vec![rocket.container_id().to_string()]);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let driver = Arc::new(MockDriver::new());
        let (pool, _) = pool(driver);
        pool.warmup(1).await.unwrap();
        let mut events = pool.subscribe();

        let mut rocket = pool.assign_mission(mission("pr-1")).await.unwrap();
        rocket.ignite().unwrap();
        pool.commit(&mut rocket).await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(
            first.kind,
            RocketEventKind::MissionAssigned {
                mission_id: "pr-1".to_string()
            }
        );
        let second = events.recv().await.unwrap();
        assert_eq!(
            second.kind,
            RocketEventKind::Ignited {
                mission_id: "pr-1".to_string()
            }
        );
    }
}
