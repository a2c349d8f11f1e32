// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory routing table.
//!
//! Maps public hostnames to backend base URLs. The HTTP edge resolves
//! incoming `Host` headers through [`RouteTable::resolve`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AdapterResult, Router};

/// Hostname to backend routing table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, String>>,
}

impl RouteTable {
    /// Create an empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend base URL for `hostname`, if routed.
    ///
    /// Matching is case-insensitive and ignores a `:port` suffix.
    pub async fn resolve(&self, hostname: &str) -> Option<String> {
        let key = normalize(hostname);
        self.routes.read().await.get(&key).cloned()
    }

    /// All routes, sorted by hostname.
    pub async fn routes(&self) -> Vec<(String, String)> {
        let mut routes: Vec<_> = self
            .routes
            .read()
            .await
            .iter()
            .map(|(host, target)| (host.clone(), target.clone()))
            .collect();
        routes.sort();
        routes
    }
}

fn normalize(hostname: &str) -> String {
    let host = hostname.split(':').next().unwrap_or(hostname);
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl Router for RouteTable {
    async fn register(&self, hostname: &str, target_base_url: &str) -> AdapterResult<()> {
        let key = normalize(hostname);
        let previous = self
            .routes
            .write()
            .await
            .insert(key.clone(), target_base_url.to_string());

        info!(
            hostname = %key,
            target = %target_base_url,
            replaced = previous.is_some(),
            "Registered route"
        );
        Ok(())
    }

    async fn unregister(&self, hostname: &str) -> AdapterResult<()> {
        let key = normalize(hostname);
        if self.routes.write().await.remove(&key).is_some() {
            info!(hostname = %key, "Unregistered route");
        } else {
            debug!(hostname = %key, "No route to unregister");
        }
        Ok(())
    }
}
