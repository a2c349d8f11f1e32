// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launchpad Environment - Preview Environment Control Plane
//!
//! This crate turns a mission (a repository revision to preview) into a
//! running, routed application inside a pre-warmed container, streams its
//! telemetry, and returns the container to the pool when the mission ends.
//!
//! # Architecture
//!
//! ```text
//!                 launch(mission, sink)          recycle(mission_id)
//!                          │                              │
//!                          ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Mission Control                             │
//! │        log stream · stats poll · expiry timer · route upkeep         │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                         │                          │
//!          ▼                         ▼                          ▼
//! ┌─────────────────┐     ┌─────────────────────┐     ┌─────────────────┐
//! │  Pool Manager   │────▶│   Refurbish Unit    │     │     Router      │
//! │ warmup · claim  │     │ cleanup or scrap    │     │ host → backend  │
//! └─────────────────┘     └─────────────────────┘     └─────────────────┘
//!          │                         │
//!          ▼                         ▼
//! ┌─────────────────┐     ┌─────────────────────┐
//! │ RocketRepository│     │  Payload Injector   │
//! │ memory · sqlite │     │ clone · copy · npm  │
//! └─────────────────┘     └─────────────────────┘
//!                                    │
//!                                    ▼
//!                        ┌───────────────────────┐
//!                        │  Container driver     │
//!                        │  (docker CLI / mock)  │
//!                        └───────────────────────┘
//! ```
//!
//! # Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`PoolManager`] | Standing inventory of rockets; atomic claim; recycle |
//! | [`PayloadInjector`] | Checkout, copy, install with mirror fallback, start |
//! | [`RefurbishUnit`] | Wipes returned containers, decommissions on failure |
//! | [`MissionControl`] | Launch, telemetry, expiry, routing |
//! | [`PoolMaintainer`] | Sweeps decommissioned rockets and re-warms the pool |
//! | [`LaunchpadRuntime`] | Wires everything together for embedding |
//!
//! # Configuration
//!
//! The `launchpad` binary reads its settings from `LAUNCHPAD_*` environment
//! variables; see [`config::Config`].

#![deny(missing_docs)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod mission_control;
pub mod payload_injector;
pub mod pool_maintainer;
pub mod pool_manager;
pub mod refurbish_unit;
pub mod runtime;

pub use error::{Error, Result};
pub use mission_control::{MissionControl, MissionControlConfig, Telemetry, TelemetrySink};
pub use payload_injector::{InjectorConfig, PayloadInjector};
pub use pool_maintainer::{PoolMaintainer, PoolMaintainerConfig};
pub use pool_manager::PoolManager;
pub use refurbish_unit::RefurbishUnit;
pub use runtime::LaunchpadRuntime;
