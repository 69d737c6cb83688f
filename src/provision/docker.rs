//! Minimal Docker CLI wrapper for ephemeral database instances.
//!
//! Shells out to `docker` (or `$SCHEMAGEN_DOCKER`). A [`Container`] that is
//! dropped without [`Container::remove`] is force-removed synchronously, so an
//! early return or panic never leaks a running instance.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{SchemaGenError, SchemaGenResult};

/// What to run.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub env: Vec<(String, String)>,
    /// Container port published on an ephemeral loopback host port.
    pub port: u16,
    pub labels: Vec<(String, String)>,
}

impl ContainerSpec {
    /// A Postgres container configured with the given credentials.
    pub fn postgres(image: &str, user: &str, password: &str, database: &str) -> Self {
        Self {
            image: image.to_string(),
            env: vec![
                ("POSTGRES_USER".to_string(), user.to_string()),
                ("POSTGRES_PASSWORD".to_string(), password.to_string()),
                ("POSTGRES_DB".to_string(), database.to_string()),
            ],
            port: 5432,
            labels: Vec::new(),
        }
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "--rm".to_string()];
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("-p".to_string());
        args.push(format!("127.0.0.1::{}", self.port));
        args.push(self.image.clone());
        args
    }
}

/// A running container.
#[derive(Debug)]
pub struct Container {
    id: String,
    docker: String,
    removed: bool,
}

impl Container {
    /// Start a detached container and return once `docker run` reports its id.
    pub async fn run(spec: &ContainerSpec) -> SchemaGenResult<Self> {
        let docker = docker_binary();
        let output = Command::new(&docker)
            .args(spec.run_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SchemaGenError::ProvisioningFailed {
                reason: format!("failed to invoke '{}': {}", docker, e),
            })?;

        if !output.status.success() {
            return Err(SchemaGenError::ProvisioningFailed {
                reason: format!(
                    "'{} run {}' failed: {}",
                    docker,
                    spec.image,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(SchemaGenError::ProvisioningFailed {
                reason: format!("'{} run' returned no container id", docker),
            });
        }

        debug!(container = %short_id(&id), image = %spec.image, "container started");
        Ok(Self {
            id,
            docker,
            removed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The loopback host port Docker published for `container_port`.
    pub async fn host_port(&self, container_port: u16) -> SchemaGenResult<u16> {
        let output = Command::new(&self.docker)
            .args(["port", &self.id, &format!("{}/tcp", container_port)])
            .output()
            .await
            .map_err(|e| SchemaGenError::ProvisioningFailed {
                reason: format!("failed to inspect container port: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_host_port(&stdout).ok_or_else(|| SchemaGenError::ProvisioningFailed {
            reason: format!(
                "no host port published for {}/tcp: {}",
                container_port,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }

    /// Force-remove the container. If `docker rm -f` fails, the error is
    /// returned and the drop guard tries once more.
    pub async fn remove(mut self) -> SchemaGenResult<()> {
        let output = Command::new(&self.docker)
            .args(["rm", "-f", &self.id])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SchemaGenError::ProvisioningFailed {
                reason: format!("failed to invoke '{}': {}", self.docker, e),
            })?;

        if !output.status.success() {
            return Err(SchemaGenError::ProvisioningFailed {
                reason: format!(
                    "'{} rm -f {}' exited with {}: {}",
                    self.docker,
                    short_id(&self.id),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        self.removed = true;
        debug!(container = %short_id(&self.id), "container removed");
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        warn!(container = %short_id(&self.id), "container dropped without release, removing");
        let _ = std::process::Command::new(&self.docker)
            .args(["rm", "-f", &self.id])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

fn docker_binary() -> String {
    std::env::var("SCHEMAGEN_DOCKER").unwrap_or_else(|_| "docker".to_string())
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// Parse `docker port` output (`127.0.0.1:49153`, possibly several lines).
fn parse_host_port(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        assert_eq!(parse_host_port("127.0.0.1:49153\n"), Some(49153));
        assert_eq!(parse_host_port("0.0.0.0:5000\n[::]:5000\n"), Some(5000));
        assert_eq!(parse_host_port(""), None);
    }

    #[tokio::test]
    async fn test_failed_removal_is_reported() {
        // `false` exits non-zero for any arguments, like a daemon that refuses.
        let container = Container {
            id: "0123456789abcdef".to_string(),
            docker: "false".to_string(),
            removed: false,
        };

        let err = container.remove().await.unwrap_err();
        assert!(matches!(err, SchemaGenError::ProvisioningFailed { ref reason } if reason.contains("rm -f")));
    }

    #[test]
    fn test_run_args() {
        let spec = ContainerSpec::postgres("postgres:15", "postgres", "secret", "app")
            .label("schemagen.pipeline", "datamodel");
        let args = spec.run_args();

        assert_eq!(&args[..3], &["run", "-d", "--rm"]);
        assert!(args.contains(&"POSTGRES_PASSWORD=secret".to_string()));
        assert!(args.contains(&"schemagen.pipeline=datamodel".to_string()));
        assert!(args.contains(&"127.0.0.1::5432".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("postgres:15"));
    }
}
