// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed rocket repository.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::mission::Mission;
use crate::rocket::{Rocket, RocketSnapshot, RocketStatus};

use super::RocketRepository;

const SCHEMA: &str = include_str!("../../migrations/schema.sql");

const SELECT_COLUMNS: &str = "SELECT id, container_id, status, current_mission, assigned_domain FROM rockets";

/// Row shape of the `rockets` table.
#[derive(Debug, sqlx::FromRow)]
struct RocketRow {
    id: String,
    container_id: String,
    status: String,
    current_mission: Option<String>,
    assigned_domain: Option<String>,
}

impl TryFrom<RocketRow> for Rocket {
    type Error = CoreError;

    fn try_from(row: RocketRow) -> Result<Self> {
        let current_mission = row
            .current_mission
            .as_deref()
            .map(serde_json::from_str::<Mission>)
            .transpose()?;

        Rocket::from_snapshot(RocketSnapshot {
            id: row.id,
            container_id: row.container_id,
            status: row.status.parse::<RocketStatus>()?,
            current_mission,
            assigned_domain: row.assigned_domain,
        })
    }
}

/// SQLite-backed rocket repository.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Create a repository from an existing pool.
    ///
    /// The schema is not applied; call [`migrate`](Self::migrate) if needed.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a repository from a database file path.
    ///
    /// Creates parent directories and the database file if missing, then
    /// applies the schema.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repository = Self { pool };
        repository.migrate().await?;
        Ok(repository)
    }

    /// Create a private in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        // A single connection, otherwise each connection sees its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repository = Self { pool };
        repository.migrate().await?;
        Ok(repository)
    }

    /// Apply the rockets schema.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_optional(&self, sql: &str, bind: Option<&str>) -> Result<Option<Rocket>> {
        let mut query = sqlx::query_as::<_, RocketRow>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        query
            .fetch_optional(&self.pool)
            .await?
            .map(Rocket::try_from)
            .transpose()
    }
}

#[async_trait]
impl RocketRepository for SqliteRepository {
    async fn save(&self, rocket: &Rocket) -> Result<()> {
        let current_mission = rocket
            .current_mission()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO rockets (id, container_id, status, current_mission, mission_id, assigned_domain)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                container_id = excluded.container_id,
                status = excluded.status,
                current_mission = excluded.current_mission,
                mission_id = excluded.mission_id,
                assigned_domain = excluded.assigned_domain,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(rocket.id())
        .bind(rocket.container_id())
        .bind(rocket.status().as_str())
        .bind(current_mission)
        .bind(rocket.current_mission().map(|m| m.id()))
        .bind(rocket.assigned_domain())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Rocket>> {
        self.fetch_optional(&format!("{SELECT_COLUMNS} WHERE id = ?"), Some(id))
            .await
    }

    async fn find_idle(&self) -> Result<Option<Rocket>> {
        self.fetch_optional(
            &format!("{SELECT_COLUMNS} WHERE status = 'IDLE' ORDER BY rowid LIMIT 1"),
            None,
        )
        .await
    }

    async fn find_all(&self) -> Result<Vec<Rocket>> {
        sqlx::query_as::<_, RocketRow>(&format!("{SELECT_COLUMNS} ORDER BY rowid"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Rocket::try_from)
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM rockets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_idle(&self, mission: &Mission) -> Result<Option<Rocket>> {
        let mission_json = serde_json::to_string(mission)?;

        loop {
            let Some(mut rocket) = self.find_idle().await? else {
                return Ok(None);
            };

            rocket.assign_mission(mission.clone())?;

            // Compare-and-swap on status: only one claimant sees rows_affected == 1.
            let result = sqlx::query(
                r#"
                UPDATE rockets
                SET status = ?, current_mission = ?, mission_id = ?, updated_at = CURRENT_TIMESTAMP
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(RocketStatus::Preparing.as_str())
            .bind(&mission_json)
            .bind(mission.id())
            .bind(rocket.id())
            .bind(RocketStatus::Idle.as_str())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(Some(rocket));
            }

            debug!(rocket_id = %rocket.id(), "Idle rocket claimed concurrently, retrying");
        }
    }

    async fn find_by_mission(&self, mission_id: &str) -> Result<Option<Rocket>> {
        self.fetch_optional(
            &format!("{SELECT_COLUMNS} WHERE mission_id = ? ORDER BY rowid LIMIT 1"),
            Some(mission_id),
        )
        .await
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rockets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mission(id: &str) -> Mission {
        Mission::new(id, "https://example.com/app.git", "main", "abc123")
    }

    #[tokio::test]
    async fn test_save_and_find_by_id() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let rocket = Rocket::new("container-1");

        repo.save(&rocket).await.unwrap();

        let found = repo
            .find_by_id(rocket.id())
            .await
            .expect("Query should succeed")
            .expect("Rocket should exist");
        assert_eq!(found.to_snapshot(), rocket.to_snapshot());
    }

    #[tokio::test]
    async fn test_find_by_id_not_found() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        assert!(repo.find_by_id("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_upserts_mission_and_domain() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let mut rocket = Rocket::new("container-1");
        repo.save(&rocket).await.unwrap();

        rocket.assign_mission(mission("pr-1")).unwrap();
        rocket.ignite().unwrap();
        rocket.assign_domain("pr-1.preview.localhost").unwrap();
        repo.save(&rocket).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let found = repo.find_by_id(rocket.id()).await.unwrap().unwrap();
        assert_eq!(found.status(), RocketStatus::Orbiting);
        assert_eq!(found.current_mission(), Some(&mission("pr-1")));
        assert_eq!(found.assigned_domain(), Some("pr-1.preview.localhost"));
    }

    #[tokio::test]
    async fn test_find_idle_returns_oldest() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let first = Rocket::new("container-1");
        let second = Rocket::new("container-2");
        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();

        let found = repo.find_idle().await.unwrap().unwrap();
        assert_eq!(found.id(), first.id());
    }

    #[tokio::test]
    async fn test_find_all_and_delete() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let first = Rocket::new("container-1");
        let second = Rocket::new("container-2");
        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();

        repo.delete(first.id()).await.unwrap();

        let all = repo.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id(), second.id());
    }

    #[tokio::test]
    async fn test_claim_idle() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.save(&Rocket::new("container-1")).await.unwrap();

        let claimed = repo.claim_idle(&mission("pr-1")).await.unwrap().unwrap();
        assert_eq!(claimed.status(), RocketStatus::Preparing);

        let stored = repo.find_by_id(claimed.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RocketStatus::Preparing);
        assert_eq!(stored.current_mission().unwrap().id(), "pr-1");

        assert!(repo.claim_idle(&mission("pr-2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_mission() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.save(&Rocket::new("container-1")).await.unwrap();
        let claimed = repo.claim_idle(&mission("pr-3")).await.unwrap().unwrap();

        let found = repo.find_by_mission("pr-3").await.unwrap().unwrap();
        assert_eq!(found.id(), claimed.id());
        assert!(repo.find_by_mission("pr-4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_path_persists_across_connections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("rockets.db");
        let rocket = Rocket::new("container-1");

        {
            let repo = SqliteRepository::from_path(&path).await.unwrap();
            repo.save(&rocket).await.unwrap();
        }

        let repo = SqliteRepository::from_path(&path).await.unwrap();
        let found = repo.find_by_id(rocket.id()).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_on_shared_file() {
        let temp_dir = TempDir::new().unwrap();
        let repo = std::sync::Arc::new(
            SqliteRepository::from_path(temp_dir.path().join("rockets.db"))
                .await
                .unwrap(),
        );
        for n in 1..=3 {
            repo.save(&Rocket::new(format!("container-{n}"))).await.unwrap();
        }

        // Claimants race for the same oldest idle row over separate connections.
        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.claim_idle(&mission(&format!("pr-{n}"))).await })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(rocket) = handle.await.unwrap().unwrap() {
                claimed.push(rocket.id().to_string());
            }
        }

        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 3, "each idle rocket is claimed exactly once");
        assert!(repo.find_idle().await.unwrap().is_none());

        let all = repo.find_all().await.unwrap();
        assert!(all.iter().all(|r| r.status() == RocketStatus::Preparing));
        let missions: std::collections::HashSet<_> = all
            .iter()
            .filter_map(|r| r.current_mission().map(|m| m.id().to_string()))
            .collect();
        assert_eq!(missions.len(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_status_is_rejected() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        sqlx::query("INSERT INTO rockets (id, container_id, status) VALUES ('r1', 'c1', 'LAUNCHED')")
            .execute(&repo.pool)
            .await
            .unwrap();

        assert!(matches!(
            repo.find_by_id("r1").await,
            Err(CoreError::UnknownStatus(_))
        ));
    }
}
