// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rocket aggregate.
//!
//! A rocket wraps one execution unit (container) and owns its lifecycle
//! status and current mission. Transitions append [`RocketEvent`]s to an
//! internal buffer which callers drain with [`Rocket::pull_domain_events`]
//! after each operation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::mission::Mission;

/// Lifecycle status of a rocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RocketStatus {
    /// Clean and available for a new mission.
    Idle,
    /// Mission bound, code injection in progress.
    Preparing,
    /// Application running and serving the mission.
    Orbiting,
    /// Cleanup in progress.
    Refurbishing,
    /// Removed from service; the execution unit is no longer trusted.
    Decommissioned,
}

impl RocketStatus {
    /// Get the status string as stored in the repository.
    pub fn as_str(&self) -> &'static str {
        match self {
            RocketStatus::Idle => "IDLE",
            RocketStatus::Preparing => "PREPARING",
            RocketStatus::Orbiting => "ORBITING",
            RocketStatus::Refurbishing => "REFURBISHING",
            RocketStatus::Decommissioned => "DECOMMISSIONED",
        }
    }

    /// Whether a rocket in this status must carry a mission.
    pub fn carries_mission(&self) -> bool {
        matches!(
            self,
            RocketStatus::Preparing | RocketStatus::Orbiting | RocketStatus::Refurbishing
        )
    }
}

impl fmt::Display for RocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RocketStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IDLE" => Ok(RocketStatus::Idle),
            "PREPARING" => Ok(RocketStatus::Preparing),
            "ORBITING" => Ok(RocketStatus::Orbiting),
            "REFURBISHING" => Ok(RocketStatus::Refurbishing),
            "DECOMMISSIONED" => Ok(RocketStatus::Decommissioned),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// What happened to a rocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RocketEventKind {
    /// A mission was bound to the rocket.
    MissionAssigned {
        /// The mission that was assigned.
        mission_id: String,
    },
    /// The application process was started.
    Ignited {
        /// The mission being served.
        mission_id: String,
    },
    /// The mission ended and cleanup started.
    SplashedDown {
        /// The mission that ended.
        mission_id: String,
    },
    /// Cleanup finished and the rocket is idle again.
    RefurbishmentCompleted,
    /// The rocket was removed from service.
    Decommissioned {
        /// Status the rocket was in before decommissioning.
        previous: RocketStatus,
    },
    /// A public hostname was assigned.
    DomainAssigned {
        /// The assigned hostname.
        hostname: String,
    },
}

/// Domain event recorded by a rocket transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RocketEvent {
    /// Rocket the event belongs to.
    pub rocket_id: String,
    /// When the transition happened.
    pub occurred_at: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub kind: RocketEventKind,
}

/// Serializable rocket state, as stored by repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RocketSnapshot {
    /// Rocket ID.
    pub id: String,
    /// Handle of the underlying execution unit.
    pub container_id: String,
    /// Lifecycle status.
    pub status: RocketStatus,
    /// Mission currently bound to the rocket.
    pub current_mission: Option<Mission>,
    /// Public hostname currently routed to the rocket.
    pub assigned_domain: Option<String>,
}

/// One reusable execution unit and its lifecycle state.
#[derive(Debug, Clone)]
pub struct Rocket {
    id: String,
    container_id: String,
    status: RocketStatus,
    current_mission: Option<Mission>,
    assigned_domain: Option<String>,
    events: Vec<RocketEvent>,
}

impl Rocket {
    /// Create a fresh idle rocket for an execution unit.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), container_id)
    }

    /// Create a fresh idle rocket with a known ID.
    pub fn with_id(id: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.into(),
            status: RocketStatus::Idle,
            current_mission: None,
            assigned_domain: None,
            events: Vec::new(),
        }
    }

    /// Rocket ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle of the underlying execution unit.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> RocketStatus {
        self.status
    }

    /// Mission currently bound to the rocket.
    pub fn current_mission(&self) -> Option<&Mission> {
        self.current_mission.as_ref()
    }

    /// Public hostname currently routed to the rocket.
    pub fn assigned_domain(&self) -> Option<&str> {
        self.assigned_domain.as_deref()
    }

    /// Whether the rocket is still working on `mission_id`.
    pub fn is_serving(&self, mission_id: &str) -> bool {
        self.status.carries_mission()
            && self
                .current_mission
                .as_ref()
                .is_some_and(|m| m.id() == mission_id)
    }

    fn guard(&self, action: &'static str, expected: RocketStatus) -> Result<()> {
        if self.status != expected {
            return Err(CoreError::InvalidTransition {
                rocket_id: self.id.clone(),
                action,
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    fn record(&mut self, kind: RocketEventKind) {
        self.events.push(RocketEvent {
            rocket_id: self.id.clone(),
            occurred_at: Utc::now(),
            kind,
        });
    }

    fn mission_id(&self) -> String {
        self.current_mission
            .as_ref()
            .map(|m| m.id().to_string())
            .unwrap_or_default()
    }

    /// Bind a mission: `IDLE -> PREPARING`.
    pub fn assign_mission(&mut self, mission: Mission) -> Result<()> {
        self.guard("assign mission", RocketStatus::Idle)?;

        let mission_id = mission.id().to_string();
        self.current_mission = Some(mission);
        self.status = RocketStatus::Preparing;
        self.record(RocketEventKind::MissionAssigned { mission_id });
        Ok(())
    }

    /// Application started: `PREPARING -> ORBITING`.
    pub fn ignite(&mut self) -> Result<()> {
        self.guard("ignite", RocketStatus::Preparing)?;

        self.status = RocketStatus::Orbiting;
        let mission_id = self.mission_id();
        self.record(RocketEventKind::Ignited { mission_id });
        Ok(())
    }

    /// Mission over, cleanup starting: `ORBITING -> REFURBISHING`.
    pub fn splash_down(&mut self) -> Result<()> {
        self.guard("splash down", RocketStatus::Orbiting)?;

        self.status = RocketStatus::Refurbishing;
        let mission_id = self.mission_id();
        self.record(RocketEventKind::SplashedDown { mission_id });
        Ok(())
    }

    /// Cleanup verified: `REFURBISHING -> IDLE`, clearing the mission.
    pub fn finish_refurbishment(&mut self) -> Result<()> {
        self.guard("finish refurbishment", RocketStatus::Refurbishing)?;

        self.status = RocketStatus::Idle;
        self.current_mission = None;
        self.assigned_domain = None;
        self.record(RocketEventKind::RefurbishmentCompleted);
        Ok(())
    }

    /// Remove the rocket from service. Permitted from any status.
    pub fn decommission(&mut self) {
        let previous = self.status;
        self.status = RocketStatus::Decommissioned;
        self.current_mission = None;
        self.assigned_domain = None;
        self.record(RocketEventKind::Decommissioned { previous });
    }

    /// Record the public hostname routed to an orbiting rocket.
    pub fn assign_domain(&mut self, hostname: impl Into<String>) -> Result<()> {
        self.guard("assign domain", RocketStatus::Orbiting)?;

        let hostname = hostname.into();
        self.assigned_domain = Some(hostname.clone());
        self.record(RocketEventKind::DomainAssigned { hostname });
        Ok(())
    }

    /// Return and clear the events recorded since the last call.
    pub fn pull_domain_events(&mut self) -> Vec<RocketEvent> {
        std::mem::take(&mut self.events)
    }

    /// Capture the persistent state of the rocket.
    pub fn to_snapshot(&self) -> RocketSnapshot {
        RocketSnapshot {
            id: self.id.clone(),
            container_id: self.container_id.clone(),
            status: self.status,
            current_mission: self.current_mission.clone(),
            assigned_domain: self.assigned_domain.clone(),
        }
    }

    /// Rebuild a rocket from a snapshot, checking the mission invariant.
    pub fn from_snapshot(snapshot: RocketSnapshot) -> Result<Self> {
        let carries = snapshot.status.carries_mission();
        if carries != snapshot.current_mission.is_some() {
            return Err(CoreError::InvalidSnapshot {
                rocket_id: snapshot.id,
                reason: if carries {
                    format!("status {} requires a mission", snapshot.status)
                } else {
                    format!("status {} cannot carry a mission", snapshot.status)
                },
            });
        }

        Ok(Self {
            id: snapshot.id,
            container_id: snapshot.container_id,
            status: snapshot.status,
            current_mission: snapshot.current_mission,
            assigned_domain: snapshot.assigned_domain,
            events: Vec::new(),
        })
    }

    /// Serialize the rocket snapshot as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_snapshot())?)
    }

    /// Rebuild a rocket from a JSON snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_snapshot(serde_json::from_str(json)?)
    }
}
