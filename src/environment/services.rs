//! Docker-backed helper services (GROBID).

use reqwest::Client;
use std::process::Command;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const READINESS_TIMEOUT: Duration = Duration::from_secs(45);
const READINESS_POLL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("failed to run docker: {0}")]
    Io(#[from] std::io::Error),
    #[error("docker {args} failed: {stderr}")]
    Docker { args: String, stderr: String },
    #[error("service {0} not available")]
    NotAvailable(String),
}

/// A container started on demand, one per host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: &'static str,
    pub image: &'static str,
    pub port: u16,
    pub health_path: &'static str,
}

impl Service {
    pub fn health_url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.health_path)
    }
}

pub const GROBID: Service = Service {
    name: "colrev-grobid",
    image: "lfoppiano/grobid:0.8.0",
    port: 8070,
    health_path: "/api/isalive",
};

pub struct ServiceManager {
    client: Client,
    readiness_timeout: Duration,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            readiness_timeout: READINESS_TIMEOUT,
        }
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    fn docker(args: &[&str]) -> Result<String, ServiceError> {
        debug!("docker {}", args.join(" "));
        let output = Command::new("docker").args(args).output()?;
        if !output.status.success() {
            return Err(ServiceError::Docker {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn docker_available() -> bool {
        Self::docker(&["version", "--format", "{{.Server.Version}}"]).is_ok()
    }

    /// Whether a container of that name is running.
    pub fn is_running(service: &Service) -> bool {
        Self::docker(&["ps", "--filter", &format!("name={}", service.name), "--format", "{{.Names}}"])
            .is_ok_and(|out| out.lines().any(|l| l.trim() == service.name))
    }

    async fn is_ready(&self, service: &Service) -> bool {
        self.client
            .get(service.health_url())
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    /// Starts the container if needed and waits until its health endpoint answers.
    pub async fn start(&self, service: &Service) -> Result<(), ServiceError> {
        if self.is_ready(service).await {
            return Ok(());
        }
        if !Self::is_running(service) {
            info!("starting {} ({})", service.name, service.image);
            // a stopped container of the same name blocks `docker run`
            let _ = Self::docker(&["rm", "-f", service.name]);
            let port = format!("{0}:{0}", service.port);
            Self::docker(&["run", "-d", "--rm", "--name", service.name, "-p", &port, service.image])?;
        }
        self.wait_until_ready(service).await
    }

    pub async fn wait_until_ready(&self, service: &Service) -> Result<(), ServiceError> {
        let started = Instant::now();
        while started.elapsed() < self.readiness_timeout {
            if self.is_ready(service).await {
                return Ok(());
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
        Err(ServiceError::NotAvailable(service.name.to_string()))
    }

    pub fn stop(service: &Service) -> Result<(), ServiceError> {
        if Self::is_running(service) {
            Self::docker(&["stop", service.name])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_service_times_out() {
        let service = Service {
            name: "colrev-test-missing",
            image: "none",
            port: 9,
            health_path: "/",
        };
        let manager = ServiceManager::new().with_readiness_timeout(Duration::from_millis(10));
        assert!(matches!(
            manager.wait_until_ready(&service).await,
            Err(ServiceError::NotAvailable(_))
        ));
    }

    #[test]
    fn health_url() {
        assert_eq!(GROBID.health_url(), "http://localhost:8070/api/isalive");
    }
}
