//! Runtime assembly and shutdown orchestration
//!
//! Wires configuration into the router, agent manager, inference backend,
//! supervisor, and management API, in that order, and tears them down in
//! reverse. Shutdown is modeled as a cancellation token cascading from here
//! into each component's `stop`, each bounded by the configured grace
//! period.

use crate::backend::InferenceBackend;
use crate::config::SystemConfig;
use crate::error::Result;
use crate::functions::providers::{FunctionDeps, HttpInferenceClient};
use crate::manager::{AgentManager, StartupReport};
use crate::rest_api::{ApiState, bind, create_router, serve};
use crate::router::MessageRouter;
use crate::supervisor::Supervisor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The assembled multi-agent runtime
pub struct AgentRuntime {
    config: SystemConfig,
    config_path: Option<PathBuf>,
    router: Arc<MessageRouter>,
    manager: Arc<AgentManager>,
    backend: Option<Arc<InferenceBackend>>,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
    api_task: std::sync::Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl AgentRuntime {
    /// Assembles the runtime from configuration
    ///
    /// The inference client and backend handle are derived from the primary
    /// configured engine; without one, agents run with the offline
    /// dependency set.
    pub fn new(config: SystemConfig, config_path: Option<PathBuf>) -> Self {
        let router = Arc::new(MessageRouter::with_drain_timeout(Duration::from_secs(
            config.system.shutdown_grace_secs.max(1),
        )));

        let mut deps = FunctionDeps::offline();
        let backend = config.primary_engine().map(|engine| {
            deps = deps.clone().with_inference(Arc::new(HttpInferenceClient::new(
                engine.base_url(),
                engine.model.clone(),
            )));
            Arc::new(InferenceBackend::new(engine.clone()))
        });

        let manager = Arc::new(AgentManager::new(Arc::clone(&router), deps));
        let supervisor = Supervisor::new(Arc::clone(&manager), backend.clone(), &config.system);

        Self {
            config,
            config_path,
            router,
            manager,
            backend,
            supervisor,
            shutdown: CancellationToken::new(),
            api_task: std::sync::Mutex::new(None),
        }
    }

    /// The process-wide agent registry
    pub fn manager(&self) -> &Arc<AgentManager> {
        &self.manager
    }

    /// The supervisory loop
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// The message router
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// The loaded configuration
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Starts every component in dependency order and binds the management
    /// API
    ///
    /// Backend startup failures are logged and left to the supervisor to
    /// recover; a management API bind failure is fatal.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the management listener cannot be bound.
    pub async fn start(&self) -> Result<(SocketAddr, StartupReport)> {
        self.router.start();

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.start().await {
                error!("inference backend failed to start: {e}");
            }
        }

        let report = self.manager.load_configuration(&self.config).await;
        if !report.failures.is_empty() {
            warn!(failures = report.failures.len(), "some agents failed during startup");
        }

        self.supervisor.start();

        let (listener, addr) =
            bind(&self.config.system.host, self.config.system.port).await?;
        let state = ApiState {
            manager: Arc::clone(&self.manager),
            supervisor: Arc::clone(&self.supervisor),
            config_path: self.config_path.clone(),
            request_timeout: Duration::from_secs(self.config.system.request_timeout_secs.max(1)),
        };
        let router = create_router(state, &self.config.system);
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move { serve(listener, router, token).await });
        *self
            .api_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);

        info!(%addr, "management API listening");
        Ok((addr, report))
    }

    /// Stops every component in reverse order within the grace period
    pub async fn shutdown(&self) {
        info!("runtime shutting down");
        self.shutdown.cancel();

        let handle = self
            .api_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let grace = Duration::from_secs(self.config.system.shutdown_grace_secs.max(1));
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("management API did not stop within the grace period");
            }
        }

        self.supervisor.stop().await;
        self.manager.stop_all().await;
        self.router.stop().await;
        if let Some(backend) = &self.backend {
            backend.stop().await;
        }
        info!("runtime shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn minimal_config() -> SystemConfig {
        SystemConfig {
            system: crate::config::SystemSettings {
                // port 0 lets the OS choose a free port per test
                port: 0,
                ..crate::config::SystemSettings::default()
            },
            agents: vec![AgentConfig {
                name: "runtime-test".to_string(),
                functions: vec!["echo".to_string()],
                auto_start: true,
                max_concurrent_tasks: Some(1),
                ..AgentConfig::default()
            }],
            ..SystemConfig::default()
        }
    }

    #[tokio::test]
    async fn runtime_starts_agents_and_binds_the_api() {
        let runtime = AgentRuntime::new(minimal_config(), None);
        let (addr, report) = runtime.start().await.unwrap();

        assert_ne!(addr.port(), 0);
        assert_eq!(report.created, 1);
        assert_eq!(report.started, 1);
        assert_eq!(runtime.manager().running_count(), 1);

        runtime.shutdown().await;
        assert_eq!(runtime.manager().running_count(), 0);
    }
}
