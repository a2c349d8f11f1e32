// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker container driver.
//!
//! Drives the `docker` CLI through `tokio::process`. Base containers run an
//! idle `tail -f /dev/null` as PID 1 so the application can be started,
//! killed and restarted with `docker exec` without recreating the container.

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{AdapterError, AdapterResult, CommandOutput, ContainerDriver, LineSink, UnitStats};

/// Label put on every container created by launchpad.
pub const MANAGED_LABEL: &str = "launchpad.managed=true";

/// Configuration for the Docker driver.
#[derive(Debug, Clone)]
pub struct DockerCliConfig {
    /// Path or name of the docker binary.
    pub binary: String,
    /// Image used for base containers.
    pub image: String,
    /// Application port exposed (and published to a random host port).
    pub internal_port: u16,
}

impl Default for DockerCliConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            image: "node:20-alpine".to_string(),
            internal_port: 3000,
        }
    }
}

/// One line of `docker stats --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct DockerStatsLine {
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    #[serde(rename = "MemUsage")]
    mem_usage: String,
}

/// Container driver backed by the docker CLI.
pub struct DockerCli {
    config: DockerCliConfig,
}

impl DockerCli {
    /// Create a new driver.
    pub fn new(config: DockerCliConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn output(&self, args: &[&str]) -> AdapterResult<Output> {
        let mut cmd = self.command();
        cmd.args(args);
        debug!(command = ?cmd, "Running docker");

        cmd.output().await.map_err(|source| AdapterError::Spawn {
            program: "docker",
            source,
        })
    }

    /// Run docker and return trimmed stdout, failing on a non-zero exit.
    async fn checked(&self, args: &[&str]) -> AdapterResult<String> {
        let output = self.output(args).await?;

        if !output.status.success() {
            return Err(AdapterError::CommandFailed {
                command: format!("docker {}", args.first().copied().unwrap_or_default()),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerDriver for DockerCli {
    fn driver_type(&self) -> &'static str {
        "docker"
    }

    async fn create_base_container(&self) -> AdapterResult<String> {
        let port = self.config.internal_port.to_string();
        let container_id = self
            .checked(&[
                "run",
                "-d",
                "-P",
                "--expose",
                &port,
                "--label",
                MANAGED_LABEL,
                &self.config.image,
                "tail",
                "-f",
                "/dev/null",
            ])
            .await?;

        if container_id.is_empty() {
            return Err(AdapterError::UnexpectedOutput {
                command: "docker run".to_string(),
                output: container_id,
            });
        }

        info!(container_id = %container_id, image = %self.config.image, "Created base container");
        Ok(container_id)
    }

    async fn get_exposed_port(&self, unit_id: &str, internal_port: u16) -> AdapterResult<u16> {
        let spec = format!("{internal_port}/tcp");
        let output = self.checked(&["port", unit_id, &spec]).await?;

        parse_port_output(&output).ok_or_else(|| AdapterError::UnexpectedOutput {
            command: "docker port".to_string(),
            output,
        })
    }

    async fn copy_files(&self, unit_id: &str, src: &Path, dst: &str) -> AdapterResult<()> {
        // Trailing "/." copies the directory contents rather than the directory.
        let src = format!("{}/.", src.display());
        let dst = format!("{unit_id}:{dst}");
        self.checked(&["cp", &src, &dst]).await?;
        Ok(())
    }

    async fn execute_command(
        &self,
        unit_id: &str,
        argv: &[String],
    ) -> AdapterResult<CommandOutput> {
        let mut args: Vec<&str> = vec!["exec", unit_id];
        args.extend(argv.iter().map(String::as_str));

        let output = self.output(&args).await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn remove_container(&self, unit_id: &str) -> AdapterResult<()> {
        self.checked(&["rm", "-f", unit_id]).await?;
        info!(container_id = %unit_id, "Removed container");
        Ok(())
    }

    async fn stream_logs(&self, unit_id: &str, on_line: LineSink) -> AdapterResult<()> {
        let mut cmd = self.command();
        cmd.args(["logs", "-f", "--tail", "0", unit_id])
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AdapterError::Spawn {
            program: "docker",
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Other("docker logs stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AdapterError::Other("docker logs stderr not captured".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                line = out_lines.next_line(), if out_open => match line? {
                    Some(line) => on_line(line),
                    None => out_open = false,
                },
                line = err_lines.next_line(), if err_open => match line? {
                    Some(line) => on_line(line),
                    None => err_open = false,
                },
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(AdapterError::CommandFailed {
                command: "docker logs".to_string(),
                exit_code: status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }

        debug!(container_id = %unit_id, "Log stream ended");
        Ok(())
    }

    async fn get_stats(&self, unit_id: &str) -> AdapterResult<UnitStats> {
        let output = self
            .checked(&["stats", "--no-stream", "--format", "{{json .}}", unit_id])
            .await?;

        let line: DockerStatsLine = serde_json::from_str(&output)?;
        parse_stats(&line).ok_or(AdapterError::UnexpectedOutput {
            command: "docker stats".to_string(),
            output,
        })
    }
}

/// Host port of the first binding in `docker port` output.
///
/// Output looks like `0.0.0.0:49153\n[::]:49153`.
fn parse_port_output(output: &str) -> Option<u16> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.rsplit(':').next())
        .and_then(|port| port.parse().ok())
}

fn parse_stats(line: &DockerStatsLine) -> Option<UnitStats> {
    let cpu_percent = line.cpu_perc.trim().trim_end_matches('%').parse().ok()?;
    let used = line.mem_usage.split('/').next()?;
    let memory_bytes = parse_size(used)?;

    Some(UnitStats {
        cpu_percent,
        memory_bytes,
    })
}

/// Parse docker's human-readable sizes such as `12.5MiB` or `1.2GB`.
fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };

    Some((number * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_output() {
        assert_eq!(parse_port_output("0.0.0.0:49153\n[::]:49153\n"), Some(49153));
        assert_eq!(parse_port_output("\n127.0.0.1:8080"), Some(8080));
        assert_eq!(parse_port_output(""), None);
        assert_eq!(parse_port_output("garbage"), None);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("1KiB"), Some(1024));
        assert_eq!(parse_size("12.5MiB "), Some(13_107_200));
        assert_eq!(parse_size("1.5GB"), Some(1_500_000_000));
        assert_eq!(parse_size("3 parsecs"), None);
    }

    #[test]
    fn test_parse_stats() {
        let line: DockerStatsLine = serde_json::from_str(
            r#"{"BlockIO":"0B / 0B","CPUPerc":"1.25%","Container":"abc","MemPerc":"0.63%","MemUsage":"12.5MiB / 1.944GiB","Name":"x"}"#,
        )
        .unwrap();

        let stats = parse_stats(&line).unwrap();
        assert!((stats.cpu_percent - 1.25).abs() < f64::EPSILON);
        assert_eq!(stats.memory_bytes, 13_107_200);
    }

    #[test]
    fn test_parse_stats_rejects_garbage() {
        let line = DockerStatsLine {
            cpu_perc: "--".to_string(),
            mem_usage: "-- / --".to_string(),
        };
        assert!(parse_stats(&line).is_none());
    }

    #[test]
    fn test_default_config() {
        let config = DockerCliConfig::default();
        assert_eq!(config.binary, "docker");
        assert_eq!(config.internal_port, 3000);
    }
}
