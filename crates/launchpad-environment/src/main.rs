// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launchpad - Preview Environment Orchestrator
//!
//! Keeps a pool of warm Docker containers and, when given a mission on the
//! command line, deploys it and logs its telemetry until Ctrl-C.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use launchpad_core::{MemoryRepository, Mission, RocketRepository, SqliteRepository};
use launchpad_environment::adapters::docker::DockerCliConfig;
use launchpad_environment::adapters::{DockerCli, GitCli, RouteTable};
use launchpad_environment::config::Config;
use launchpad_environment::runtime::LaunchpadRuntime;
use launchpad_environment::{Telemetry, TelemetrySink};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "launchpad", version, about = "Ephemeral preview environment orchestrator")]
struct Args {
    /// Mission to launch on startup (e.g. pr-42)
    #[arg(long, requires_all = ["repo", "branch"])]
    mission_id: Option<String>,

    /// Git repository URL of the mission
    #[arg(long)]
    repo: Option<String>,

    /// Branch to deploy
    #[arg(long)]
    branch: Option<String>,

    /// Commit to pin the deploy to (branch head when empty)
    #[arg(long, default_value = "")]
    revision: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "launchpad_environment=info,launchpad_core=info,telemetry=info".into()
            }),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let args = Args::parse();
    let config = Config::from_env()?;

    info!(
        pool_size = config.pool_size,
        image = %config.base_image,
        base_domain = %config.base_domain,
        staging_dir = %config.staging_dir.display(),
        "Starting Launchpad"
    );

    let repository: Arc<dyn RocketRepository> = match &config.database_path {
        Some(path) => {
            let repository = SqliteRepository::from_path(path).await?;
            info!(path = %path.display(), "Using SQLite rocket repository");
            Arc::new(repository)
        }
        None => {
            info!("Using in-memory rocket repository");
            Arc::new(MemoryRepository::new())
        }
    };

    let driver = Arc::new(DockerCli::new(DockerCliConfig {
        image: config.base_image.clone(),
        internal_port: config.app_port,
        ..DockerCliConfig::default()
    }));
    let source_control = Arc::new(GitCli::new(&config.staging_dir));
    let routes = Arc::new(RouteTable::new());

    let runtime = LaunchpadRuntime::builder()
        .repository(repository)
        .driver(driver)
        .source_control(source_control)
        .router(routes.clone())
        .config(&config)
        .build()?
        .start()
        .await?;

    let mut events = runtime.pool().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(rocket_id = %event.rocket_id, event = ?event.kind, "Rocket event");
        }
    });

    if let (Some(mission_id), Some(repo), Some(branch)) = (args.mission_id, args.repo, args.branch)
    {
        let mission = Mission::new(mission_id, repo, branch, args.revision);
        let sink: TelemetrySink = Arc::new(|event: Telemetry| match event {
            Telemetry::Log { rocket_id, text } => {
                info!(target: "telemetry", rocket_id = %rocket_id, "{}", text);
            }
            Telemetry::Stats {
                rocket_id,
                cpu_percent,
                memory_bytes,
            } => {
                info!(
                    target: "telemetry",
                    rocket_id = %rocket_id,
                    cpu_percent,
                    memory_bytes,
                    "stats"
                );
            }
        });

        match runtime.mission_control().launch(mission.clone(), sink).await {
            Ok(rocket_id) => {
                let hostname = mission.hostname(&config.base_domain);
                info!(
                    rocket_id = %rocket_id,
                    hostname = %hostname,
                    backend = ?routes.resolve(&hostname).await,
                    "Mission in flight"
                );
            }
            Err(e) => warn!(mission_id = %mission.id(), error = %e, "Launch failed"),
        }
    }

    info!("Launchpad ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Launchpad shut down");

    Ok(())
}
