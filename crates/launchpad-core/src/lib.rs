// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launchpad Core - Missions, Rockets and the Pool Inventory
//!
//! This crate holds the domain model of the preview-environment orchestrator.
//! A [`Mission`] describes one change to preview; a [`Rocket`] is one reusable
//! execution unit (a container) together with its lifecycle state. Rockets are
//! kept in a pool whose inventory is persisted behind [`RocketRepository`].
//!
//! # Rocket Status State Machine
//!
//! ```text
//!                    ┌──────┐
//!         ┌─────────►│ IDLE │◄──────────────────┐
//!         │          └──┬───┘                   │
//!         │             │ assign_mission        │ finish_refurbishment
//!         │             ▼                       │
//!         │       ┌───────────┐          ┌──────┴───────┐
//!         │       │ PREPARING │          │ REFURBISHING │
//!         │       └─────┬─────┘          └──────▲───────┘
//!         │             │ ignite                │ splash_down
//!         │             ▼                       │
//!         │        ┌──────────┐                 │
//!         │        │ ORBITING │─────────────────┘
//!         │        └──────────┘
//!         │
//!   (any state) ── decommission ──► DECOMMISSIONED (terminal)
//! ```
//!
//! Every guarded transition checks the current status before mutating, so a
//! transition call doubles as the compare-and-swap that keeps two missions
//! from sharing a rocket. A mission is bound to the rocket exactly while it
//! is `PREPARING`, `ORBITING` or `REFURBISHING`.
//!
//! # Persistence
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`MemoryRepository`] | tests and single-process deployments |
//! | [`SqliteRepository`] | durable inventory surviving restarts |
//!
//! Both backends implement [`RocketRepository::claim_idle`] atomically.

#![deny(missing_docs)]

/// Error types for domain and persistence operations.
pub mod error;

/// The immutable mission value object.
pub mod mission;

/// The rocket aggregate, its status machine and domain events.
pub mod rocket;

/// Repository trait and storage backends for the rocket inventory.
pub mod persistence;

pub use error::{CoreError, Result};
pub use mission::Mission;
pub use persistence::{MemoryRepository, RocketRepository, SqliteRepository};
pub use rocket::{Rocket, RocketEvent, RocketEventKind, RocketSnapshot, RocketStatus};
