// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mission control.
//!
//! The upward boundary of the engine. [`MissionControl::launch`] takes a
//! mission all the way from the pool to a routed, running preview and then
//! leaves three background tasks attached to the flight:
//!
//! - a log stream forwarding container output as [`Telemetry::Log`]
//! - a stats poller emitting [`Telemetry::Stats`] until the rocket stops
//!   serving the mission
//! - an expiry timer that recycles the mission after its time to live

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use launchpad_core::{Mission, Rocket};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::adapters::{ContainerDriver, Router};
use crate::error::{Error, Result};
use crate::payload_injector::PayloadInjector;
use crate::pool_manager::PoolManager;

/// Telemetry emitted for a mission in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Telemetry {
    /// One line of application output.
    Log {
        /// Rocket that produced the line.
        #[serde(rename = "rocketId")]
        rocket_id: String,
        /// The line, without its trailing newline.
        text: String,
    },
    /// A resource usage sample.
    Stats {
        /// Rocket that was sampled.
        #[serde(rename = "rocketId")]
        rocket_id: String,
        /// CPU usage as a percentage of one core.
        #[serde(rename = "cpu")]
        cpu_percent: f64,
        /// Memory usage in bytes.
        #[serde(rename = "memory")]
        memory_bytes: u64,
    },
}

impl Telemetry {
    /// Event type name (`log` or `stats`).
    pub fn kind(&self) -> &'static str {
        match self {
            Telemetry::Log { .. } => "log",
            Telemetry::Stats { .. } => "stats",
        }
    }

    /// Rocket the event belongs to.
    pub fn rocket_id(&self) -> &str {
        match self {
            Telemetry::Log { rocket_id, .. } | Telemetry::Stats { rocket_id, .. } => rocket_id,
        }
    }
}

/// Callback receiving telemetry as it occurs.
pub type TelemetrySink = Arc<dyn Fn(Telemetry) + Send + Sync>;

/// Configuration for mission control.
#[derive(Debug, Clone)]
pub struct MissionControlConfig {
    /// Application port inside the container.
    pub internal_port: u16,
    /// Domain that mission hostnames are created under.
    pub base_domain: String,
    /// Stats poll period.
    pub stats_interval: Duration,
    /// Time a mission stays in flight before it is recycled.
    pub mission_ttl: Duration,
}

impl Default for MissionControlConfig {
    fn default() -> Self {
        Self {
            internal_port: 3000,
            base_domain: "preview.localhost".to_string(),
            stats_interval: Duration::from_secs(5),
            mission_ttl: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// Background state of a launched mission.
struct Flight {
    rocket_id: String,
    hostname: String,
    stop_stats: Arc<Notify>,
    log_task: JoinHandle<()>,
    expiry_task: JoinHandle<()>,
}

impl Flight {
    /// Stop the log stream and stats poll, and the expiry timer if asked.
    fn ground(self, abort_expiry: bool) -> (String, String) {
        self.stop_stats.notify_one();
        self.log_task.abort();
        if abort_expiry {
            self.expiry_task.abort();
        }
        (self.rocket_id, self.hostname)
    }
}

/// Launches missions and supervises them while they are in flight.
#[derive(Clone)]
pub struct MissionControl {
    pool: Arc<PoolManager>,
    injector: Arc<PayloadInjector>,
    driver: Arc<dyn ContainerDriver>,
    router: Option<Arc<dyn Router>>,
    config: Arc<MissionControlConfig>,
    flights: Arc<Mutex<HashMap<String, Flight>>>,
    /// Serializes launch, recycle and expiry of the same mission id.
    mission_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl MissionControl {
    /// Create mission control without a router.
    pub fn new(
        pool: Arc<PoolManager>,
        injector: Arc<PayloadInjector>,
        driver: Arc<dyn ContainerDriver>,
        config: MissionControlConfig,
    ) -> Self {
        Self {
            pool,
            injector,
            driver,
            router: None,
            config: Arc::new(config),
            flights: Arc::new(Mutex::new(HashMap::new())),
            mission_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register mission hostnames with `router`.
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// The pool this mission control draws rockets from.
    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// IDs of missions currently in flight, sorted.
    pub fn missions_in_flight(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .flights
            .lock()
            .map(|flights| flights.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Launch `mission` and return the id of the rocket carrying it.
    ///
    /// Returns once the application has been started and routed. Telemetry
    /// keeps flowing into `sink` until the mission is recycled or expires.
    /// Any rocket already carrying the mission id is recycled first, and
    /// overlapping launches of the same id run one after the other.
    pub async fn launch(&self, mission: Mission, sink: TelemetrySink) -> Result<String> {
        let mission_id = mission.id().to_string();
        let lock = self.mission_lock(&mission_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.launch_locked(mission, sink).await
        };
        self.release_mission_lock(&mission_id, lock);
        result
    }

    /// End `mission_id`: stop its telemetry, drop its route and return its
    /// rocket to the pool.
    ///
    /// Unknown or already recycled missions are a no-op.
    pub async fn recycle(&self, mission_id: &str) -> Result<Option<Rocket>> {
        let lock = self.mission_lock(mission_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.recycle_locked(mission_id).await
        };
        self.release_mission_lock(mission_id, lock);
        result
    }

    async fn launch_locked(&self, mission: Mission, sink: TelemetrySink) -> Result<String> {
        let mission_id = mission.id().to_string();

        if let Some(previous) = self.recycle_locked(&mission_id).await? {
            info!(
                mission_id = %mission_id,
                previous_rocket_id = %previous.id(),
                "Superseded previous launch of mission"
            );
        }

        let mut rocket = self.pool.assign_mission(mission.clone()).await?;

        if let Err(e) = self.injector.deploy(&mut rocket).await {
            error!(
                rocket_id = %rocket.id(),
                mission_id = %mission_id,
                error = %e,
                "Deploy failed"
            );
            return Err(e);
        }

        match self.bring_online(&mut rocket, &mission, sink).await {
            Ok((hostname, port)) => {
                info!(
                    rocket_id = %rocket.id(),
                    mission_id = %mission_id,
                    hostname = %hostname,
                    port,
                    "Mission launched"
                );
                Ok(rocket.id().to_string())
            }
            Err(e) => {
                error!(
                    rocket_id = %rocket.id(),
                    mission_id = %mission_id,
                    error = %e,
                    "Launch failed after deploy, recycling rocket"
                );
                if let Err(recycle_err) = self.pool.recycle(&mission_id).await {
                    error!(
                        mission_id = %mission_id,
                        error = %recycle_err,
                        "Failed to recycle rocket of failed launch"
                    );
                }
                Err(e)
            }
        }
    }

    /// Put a deployed rocket in orbit, route its hostname and attach the
    /// flight tasks. Returns the hostname and host port.
    async fn bring_online(
        &self,
        rocket: &mut Rocket,
        mission: &Mission,
        sink: TelemetrySink,
    ) -> Result<(String, u16)> {
        self.pool.commit(rocket).await?;

        let port = self
            .driver
            .get_exposed_port(rocket.container_id(), self.config.internal_port)
            .await?;
        let hostname = mission.hostname(&self.config.base_domain);
        rocket.assign_domain(hostname.clone())?;
        self.pool.commit(rocket).await?;

        if let Some(router) = &self.router {
            router
                .register(&hostname, &format!("http://localhost:{port}"))
                .await?;
        }

        if let Err(e) = self.track(rocket, mission.id(), hostname.clone(), sink) {
            self.unregister(&hostname).await;
            return Err(e);
        }
        Ok((hostname, port))
    }

    async fn recycle_locked(&self, mission_id: &str) -> Result<Option<Rocket>> {
        let flight = self.take_flight(mission_id, None)?;
        if let Some(flight) = flight {
            let (_, hostname) = flight.ground(true);
            self.unregister(&hostname).await;
        }
        self.pool.recycle(mission_id).await
    }

    fn mission_lock(&self, mission_id: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .mission_locks
            .lock()
            .map_err(|_| Error::Other("mission lock table poisoned".to_string()))?;
        Ok(locks.entry(mission_id.to_string()).or_default().clone())
    }

    fn release_mission_lock(&self, mission_id: &str, lock: Arc<AsyncMutex<()>>) {
        if let Ok(mut locks) = self.mission_locks.lock() {
            // Held only by the table and this caller.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(mission_id);
            }
        }
    }

    /// Stop all background tasks without recycling the rockets.
    pub async fn shutdown(&self) {
        let flights: Vec<Flight> = match self.flights.lock() {
            Ok(mut flights) => flights.drain().map(|(_, flight)| flight).collect(),
            Err(_) => Vec::new(),
        };

        let count = flights.len();
        for flight in flights {
            let (_, hostname) = flight.ground(true);
            self.unregister(&hostname).await;
        }

        if count > 0 {
            info!(flights = count, "Mission control grounded in-flight missions");
        }
    }

    fn is_in_flight(&self, mission_id: &str) -> Result<bool> {
        let flights = self
            .flights
            .lock()
            .map_err(|_| Error::Other("flight table poisoned".to_string()))?;
        Ok(flights.contains_key(mission_id))
    }

    /// Remove the flight for `mission_id`, if it belongs to `rocket_id`
    /// when one is given.
    fn take_flight(&self, mission_id: &str, rocket_id: Option<&str>) -> Result<Option<Flight>> {
        let mut flights = self
            .flights
            .lock()
            .map_err(|_| Error::Other("flight table poisoned".to_string()))?;

        let matches = match (flights.get(mission_id), rocket_id) {
            (Some(flight), Some(rocket_id)) => flight.rocket_id == rocket_id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        Ok(if matches { flights.remove(mission_id) } else { None })
    }

    async fn unregister(&self, hostname: &str) {
        if let Some(router) = &self.router {
            if let Err(e) = router.unregister(hostname).await {
                warn!(hostname = %hostname, error = %e, "Failed to unregister route");
            }
        }
    }

    fn track(
        &self,
        rocket: &Rocket,
        mission_id: &str,
        hostname: String,
        sink: TelemetrySink,
    ) -> Result<()> {
        let rocket_id = rocket.id().to_string();
        let container_id = rocket.container_id().to_string();
        let stop_stats = Arc::new(Notify::new());

        let mut flights = self
            .flights
            .lock()
            .map_err(|_| Error::Other("flight table poisoned".to_string()))?;

        let log_task = tokio::spawn(stream_logs(
            self.driver.clone(),
            rocket_id.clone(),
            container_id.clone(),
            sink.clone(),
        ));

        tokio::spawn(poll_stats(
            self.pool.clone(),
            self.driver.clone(),
            rocket_id.clone(),
            container_id,
            mission_id.to_string(),
            self.config.stats_interval,
            stop_stats.clone(),
            sink.clone(),
        ));

        let control = self.clone();
        let expiry_mission = mission_id.to_string();
        let expiry_rocket = rocket_id.clone();
        let ttl = self.config.mission_ttl;
        let expiry_task = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            control.expire(&expiry_mission, &expiry_rocket, sink).await;
        });

        let replaced = flights.insert(
            mission_id.to_string(),
            Flight {
                rocket_id,
                hostname,
                stop_stats,
                log_task,
                expiry_task,
            },
        );
        if let Some(old) = replaced {
            let (old_rocket_id, _) = old.ground(true);
            warn!(
                mission_id = %mission_id,
                rocket_id = %old_rocket_id,
                "Replaced a flight that was still tracked"
            );
        }
        Ok(())
    }

    async fn expire(&self, mission_id: &str, rocket_id: &str, sink: TelemetrySink) {
        info!(mission_id = %mission_id, rocket_id = %rocket_id, "Mission expired");

        let lock = match self.mission_lock(mission_id) {
            Ok(lock) => lock,
            Err(e) => {
                error!(mission_id = %mission_id, error = %e, "Failed to expire mission");
                return;
            }
        };
        {
            let _guard = lock.lock().await;
            self.expire_locked(mission_id, rocket_id).await;
        }
        self.release_mission_lock(mission_id, lock);

        sink(Telemetry::Log {
            rocket_id: rocket_id.to_string(),
            text: "mission expired".to_string(),
        });
    }

    async fn expire_locked(&self, mission_id: &str, rocket_id: &str) {
        let flight = match self.take_flight(mission_id, Some(rocket_id)) {
            Ok(flight) => flight,
            Err(e) => {
                error!(mission_id = %mission_id, error = %e, "Failed to end flight");
                None
            }
        };

        // A different rocket now carries the mission; leave it alone.
        let superseded = flight.is_none() && self.is_in_flight(mission_id).unwrap_or(false);

        if let Some(flight) = flight {
            let (_, hostname) = flight.ground(false);
            self.unregister(&hostname).await;
        }

        if !superseded {
            if let Err(e) = self.pool.recycle(mission_id).await {
                error!(mission_id = %mission_id, error = %e, "Failed to recycle expired mission");
            }
        }
    }
}

async fn stream_logs(
    driver: Arc<dyn ContainerDriver>,
    rocket_id: String,
    container_id: String,
    sink: TelemetrySink,
) {
    let line_rocket = rocket_id.clone();
    let on_line = Box::new(move |text: String| {
        sink(Telemetry::Log {
            rocket_id: line_rocket.clone(),
            text,
        })
    });

    match driver.stream_logs(&container_id, on_line).await {
        Ok(()) => debug!(rocket_id = %rocket_id, "Log stream closed"),
        Err(e) => warn!(rocket_id = %rocket_id, error = %e, "Log stream failed"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_stats(
    pool: Arc<PoolManager>,
    driver: Arc<dyn ContainerDriver>,
    rocket_id: String,
    container_id: String,
    mission_id: String,
    period: Duration,
    stop: Arc<Notify>,
    sink: TelemetrySink,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = stop.notified() => {
                debug!(rocket_id = %rocket_id, "Stats poll stopped");
                break;
            }

            _ = ticker.tick() => {}
        }

        match pool.rocket(&rocket_id).await {
            Ok(Some(rocket)) if rocket.is_serving(&mission_id) => {}
            Ok(_) => {
                debug!(
                    rocket_id = %rocket_id,
                    mission_id = %mission_id,
                    "Rocket no longer serving mission, stopping stats poll"
                );
                break;
            }
            Err(e) => {
                warn!(rocket_id = %rocket_id, error = %e, "Failed to look up rocket");
                continue;
            }
        }

        match driver.get_stats(&container_id).await {
            Ok(stats) => sink(Telemetry::Stats {
                rocket_id: rocket_id.clone(),
                cpu_percent: stats.cpu_percent,
                memory_bytes: stats.memory_bytes,
            }),
            Err(e) => debug!(rocket_id = %rocket_id, error = %e, "Failed to sample stats"),
        }
    }
}
