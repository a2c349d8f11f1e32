// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for launchpad-environment integration tests.
//!
//! Provides TestContext wiring the engine to mock collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use launchpad_core::{MemoryRepository, Mission, RocketRepository};

use launchpad_environment::adapters::{MockDriver, MockSourceControl, RouteTable};
use launchpad_environment::{
    InjectorConfig, MissionControl, MissionControlConfig, PayloadInjector, PoolManager,
    RefurbishUnit, Telemetry, TelemetrySink,
};

pub const REPO: &str = "https://github.com/acme/web.git";
pub const MIRROR: &str = "https://mirror.example";
pub const BASE_DOMAIN: &str = "preview.test";

/// Test context that wires pool, injector and mission control to mocks.
pub struct TestContext {
    pub repository: Arc<MemoryRepository>,
    pub driver: Arc<MockDriver>,
    pub source: Arc<MockSourceControl>,
    pub routes: Arc<RouteTable>,
    pub pool: Arc<PoolManager>,
    pub mission_control: MissionControl,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Create a context with default mocks.
    pub fn new() -> Self {
        Self::with_driver(MockDriver::new())
    }

    /// Create a context around a customized driver.
    pub fn with_driver(driver: MockDriver) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let repository = Arc::new(MemoryRepository::new());
        let driver = Arc::new(driver);
        let source = Arc::new(MockSourceControl::with_root(temp_dir.path()));
        let routes = Arc::new(RouteTable::new());

        let refurbisher = Arc::new(RefurbishUnit::new(
            repository.clone(),
            driver.clone(),
            "/app",
        ));
        let pool = Arc::new(
            PoolManager::new(repository.clone(), driver.clone()).with_refurbisher(refurbisher),
        );
        let injector = Arc::new(PayloadInjector::new(
            source.clone(),
            driver.clone(),
            InjectorConfig {
                mirror_registry: MIRROR.to_string(),
                ..InjectorConfig::default()
            },
        ));
        let mission_control = MissionControl::new(
            pool.clone(),
            injector,
            driver.clone(),
            MissionControlConfig {
                internal_port: 3000,
                base_domain: BASE_DOMAIN.to_string(),
                stats_interval: Duration::from_secs(5),
                mission_ttl: Duration::from_secs(600),
            },
        )
        .with_router(routes.clone());

        Self {
            repository,
            driver,
            source,
            routes,
            pool,
            mission_control,
            _temp_dir: temp_dir,
        }
    }

    /// Status of every rocket in the repository, in insertion order.
    pub async fn statuses(&self) -> Vec<launchpad_core::RocketStatus> {
        self.repository
            .find_all()
            .await
            .expect("find_all")
            .iter()
            .map(|r| r.status())
            .collect()
    }
}

/// Mission for pull request `number`.
pub fn mission(number: u64) -> Mission {
    Mission::for_pull_request(number, REPO, format!("feature-{number}"), "")
}

/// Telemetry sink that records every event.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Telemetry>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> TelemetrySink {
        let events = self.events.clone();
        Arc::new(move |event: Telemetry| events.lock().unwrap().push(event))
    }

    pub fn events(&self) -> Vec<Telemetry> {
        self.events.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Telemetry::Log { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn stats_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| event.kind() == "stats")
            .count()
    }
}
