//! External inference backend subprocess management
//!
//! The runtime treats the inference server as a single opaque subprocess
//! with a health endpoint. When configured with an executable path it spawns
//! the process with `--host H --port P`, polls the health URL until the
//! startup timeout, and on shutdown sends a graceful termination signal
//! followed by a forced kill after the grace period. A backend without an
//! executable is assumed to be externally managed and is only probed.

use crate::config::InferenceEngineConfig;
use crate::error::{AgentError, Result};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Health probe timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Running/healthy snapshot of the backend
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct BackendStatus {
    /// Whether a managed subprocess is alive (always true for externally
    /// managed backends)
    pub running: bool,
    /// Whether the health endpoint answered
    pub healthy: bool,
}

/// Supervisor handle for the inference backend subprocess
pub struct InferenceBackend {
    config: InferenceEngineConfig,
    client: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl InferenceBackend {
    /// Creates a handle for the configured backend
    pub fn new(config: InferenceEngineConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            child: Mutex::new(None),
        }
    }

    /// The backend configuration
    pub fn config(&self) -> &InferenceEngineConfig {
        &self.config
    }

    /// Spawns the subprocess (when an executable is configured) and waits
    /// for the health endpoint to answer
    ///
    /// # Errors
    ///
    /// Returns a dependency error when spawning fails and a timeout error
    /// when the backend does not become healthy within the startup timeout.
    pub async fn start(&self) -> Result<()> {
        if let Some(executable) = &self.config.executable {
            let mut guard = self.child.lock().await;
            if guard.is_some() {
                warn!(engine = %self.config.name, "inference backend already started");
                return Ok(());
            }

            info!(
                engine = %self.config.name,
                executable = %executable,
                "spawning inference backend"
            );
            let child = Command::new(executable)
                .arg("--host")
                .arg(&self.config.host)
                .arg("--port")
                .arg(self.config.port.to_string())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    AgentError::dependency(
                        "llm_backend",
                        format!("failed to spawn '{executable}': {e}"),
                    )
                })?;
            *guard = Some(child);
        }

        self.wait_until_healthy().await
    }

    async fn wait_until_healthy(&self) -> Result<()> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.startup_timeout_secs);
        loop {
            if self.is_healthy().await {
                info!(engine = %self.config.name, "inference backend is healthy");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::Timeout(Duration::from_secs(
                    self.config.startup_timeout_secs,
                )));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Probes the health endpoint
    pub async fn is_healthy(&self) -> bool {
        let request = self
            .client
            .get(self.config.health_url())
            .timeout(PROBE_TIMEOUT)
            .send();
        matches!(request.await, Ok(response) if response.status().is_success())
    }

    /// Whether the managed subprocess is alive; externally managed backends
    /// report true
    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    warn!(
                        engine = %self.config.name,
                        exit = %status,
                        "inference backend exited"
                    );
                    *guard = None;
                    false
                }
                Err(_) => false,
            },
            None => self.config.executable.is_none(),
        }
    }

    /// Running/healthy snapshot
    pub async fn status(&self) -> BackendStatus {
        BackendStatus {
            running: self.is_running().await,
            healthy: self.is_healthy().await,
        }
    }

    /// Terminates the managed subprocess: graceful signal first, forced
    /// kill after the grace period
    pub async fn stop(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // ask politely before the forced kill below
            let _ = std::process::Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .status();
        }

        let grace = Duration::from_secs(self.config.grace_period_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(engine = %self.config.name, exit = %status, "inference backend stopped");
            }
            Ok(Err(e)) => {
                warn!(engine = %self.config.name, "error waiting for backend exit: {e}");
            }
            Err(_) => {
                warn!(
                    engine = %self.config.name,
                    "inference backend did not exit within grace period, killing"
                );
                let _ = child.kill().await;
            }
        }
    }

    /// Stops and restarts the subprocess, waiting for health
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`start`].
    ///
    /// [`start`]: InferenceBackend::start
    pub async fn restart(&self) -> Result<()> {
        warn!(engine = %self.config.name, "restarting inference backend");
        self.stop().await;
        self.start().await
    }
}
