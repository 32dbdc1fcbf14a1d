//! Supervisory health loop with bounded auto-recovery
//!
//! The supervisor wakes on a fixed interval, probes the inference backend
//! and the agent population, publishes a [`SystemStatus`] snapshot, and when
//! a component is unhealthy attempts bounded recovery: at most
//! `max_recovery_attempts` within a rolling window, reset by success. After
//! exhaustion it only logs and publishes; it never crashes the process.

use crate::backend::{BackendStatus, InferenceBackend};
use crate::config::SystemSettings;
use crate::manager::AgentManager;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Agent population counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentCounts {
    /// Registered agents
    pub total: usize,
    /// Currently running agents
    pub running: usize,
}

/// Job counters across all agents
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounts {
    /// Queued jobs
    pub pending: usize,
    /// Executing jobs
    pub running: usize,
    /// Total completions since start
    pub completed_total: u64,
    /// Total failures since start
    pub failed_total: u64,
}

/// Published system health snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Inference backend state
    pub llm_backend: BackendStatus,
    /// Agent counters
    pub agents: AgentCounts,
    /// Job counters
    pub jobs: JobCounts,
    /// Mean per-agent average execution time in milliseconds
    pub avg_response_time_ms: f64,
    /// Unix timestamp of the last completed health cycle
    pub last_health_check_unix: i64,
}

/// Callback invoked with each published snapshot
pub type StatusSubscriber = Box<dyn Fn(&SystemStatus) + Send + Sync>;

/// Per-recovery-action timeout
const RECOVERY_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Background health-and-recovery loop over the runtime's components
pub struct Supervisor {
    manager: Arc<AgentManager>,
    backend: Option<Arc<InferenceBackend>>,
    interval: Duration,
    auto_recovery: bool,
    max_attempts: u32,
    recovery_window: Duration,
    attempts: Mutex<VecDeque<Instant>>,
    subscriber: Mutex<Option<StatusSubscriber>>,
    latest: RwLock<SystemStatus>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Creates a supervisor over `manager` and an optional managed backend
    pub fn new(
        manager: Arc<AgentManager>,
        backend: Option<Arc<InferenceBackend>>,
        settings: &SystemSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            backend,
            interval: Duration::from_secs(settings.health_check_interval_secs.max(1)),
            auto_recovery: settings.auto_recovery,
            max_attempts: settings.max_recovery_attempts,
            recovery_window: Duration::from_secs(settings.recovery_window_secs.max(1)),
            attempts: Mutex::new(VecDeque::new()),
            subscriber: Mutex::new(None),
            latest: RwLock::new(SystemStatus::default()),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Registers the snapshot subscriber, replacing any previous one
    pub fn subscribe(&self, subscriber: StatusSubscriber) {
        *self
            .subscriber
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(subscriber);
    }

    /// Launches the periodic loop
    pub fn start(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            info!(interval = ?supervisor.interval, "supervisor started");
            let mut ticker = tokio::time::interval(supervisor.interval);
            // the first tick fires immediately; skip it so a freshly booted
            // system gets a full interval before its first health verdict
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        supervisor.run_cycle().await;
                    }
                }
            }
            info!("supervisor stopped");
        });
        *self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    /// Signals shutdown and joins the loop
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Executes one health cycle; failures are contained here
    pub async fn run_cycle(&self) {
        let status = self.compute_status().await;
        let backend_healthy = self.backend.is_none() || status.llm_backend.healthy;
        let agents_healthy = status.agents.running >= self.manager.expected_running();

        self.publish(&status);

        if backend_healthy && agents_healthy {
            self.attempts
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clear();
            return;
        }

        if !self.auto_recovery {
            warn!(
                backend_healthy,
                agents_healthy, "unhealthy components detected, auto-recovery disabled"
            );
            return;
        }

        if !self.admit_recovery_attempt() {
            error!(
                backend_healthy,
                agents_healthy,
                "recovery attempts exhausted within the window, only reporting"
            );
            return;
        }

        if !backend_healthy {
            self.recover_backend().await;
        }
        if !agents_healthy {
            self.recover_agents().await;
        }

        // success resets the budget on the next healthy cycle
        let after = self.compute_status().await;
        self.publish(&after);
    }

    /// Computes a fresh snapshot without mutating recovery state
    pub async fn compute_status(&self) -> SystemStatus {
        let llm_backend = match &self.backend {
            Some(backend) => backend.status().await,
            None => BackendStatus {
                running: false,
                healthy: false,
            },
        };

        let aggregate = self.manager.job_aggregate().await;
        let now_unix = chrono::Utc::now().timestamp();

        SystemStatus {
            llm_backend,
            agents: AgentCounts {
                total: self.manager.agent_count(),
                running: self.manager.running_count(),
            },
            jobs: JobCounts {
                pending: aggregate.pending,
                running: aggregate.running,
                completed_total: aggregate.completed_total,
                failed_total: aggregate.failed_total,
            },
            avg_response_time_ms: self.manager.avg_response_time_ms(),
            last_health_check_unix: now_unix,
        }
    }

    /// The most recently published snapshot
    pub fn latest_status(&self) -> SystemStatus {
        self.latest
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, status: &SystemStatus) {
        *self
            .latest
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = status.clone();
        let subscriber = self
            .subscriber
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(subscriber) = subscriber.as_ref() {
            subscriber(status);
        }
    }

    /// Records an attempt if the rolling window still has budget
    fn admit_recovery_attempt(&self) -> bool {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        while let Some(oldest) = attempts.front() {
            if now.duration_since(*oldest) > self.recovery_window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        if attempts.len() >= self.max_attempts as usize {
            return false;
        }
        attempts.push_back(now);
        true
    }

    async fn recover_backend(&self) {
        let Some(backend) = &self.backend else { return };
        warn!("attempting inference backend recovery");
        match tokio::time::timeout(RECOVERY_ACTION_TIMEOUT, backend.restart()).await {
            Ok(Ok(())) => info!("inference backend recovered"),
            Ok(Err(e)) => error!("inference backend recovery failed: {e}"),
            Err(_) => error!("inference backend recovery timed out"),
        }
    }

    async fn recover_agents(&self) {
        for agent in self.manager.auto_start_agents() {
            if agent.is_running() {
                continue;
            }
            warn!(agent_id = %agent.id(), "attempting agent recovery");
            let restart = async {
                agent.stop().await;
                agent.start().await;
            };
            if tokio::time::timeout(RECOVERY_ACTION_TIMEOUT, restart).await.is_err() {
                error!(agent_id = %agent.id(), "agent recovery timed out");
            } else {
                info!(agent_id = %agent.id(), "agent recovered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, SystemConfig};
    use crate::functions::providers::FunctionDeps;
    use crate::router::MessageRouter;

    fn settings(auto_recovery: bool) -> SystemSettings {
        SystemSettings {
            health_check_interval_secs: 1,
            auto_recovery,
            max_recovery_attempts: 3,
            recovery_window_secs: 60,
            ..SystemSettings::default()
        }
    }

    async fn manager_with_agent(auto_start: bool) -> Arc<AgentManager> {
        let manager = Arc::new(AgentManager::new(
            Arc::new(MessageRouter::new()),
            FunctionDeps::offline(),
        ));
        let config = SystemConfig {
            agents: vec![AgentConfig {
                name: "watched".to_string(),
                functions: vec!["echo".to_string()],
                auto_start,
                max_concurrent_tasks: Some(1),
                ..AgentConfig::default()
            }],
            ..SystemConfig::default()
        };
        manager.load_configuration(&config).await;
        manager
    }

    #[tokio::test]
    async fn status_snapshot_reflects_the_population() {
        let manager = manager_with_agent(true).await;
        let supervisor = Supervisor::new(Arc::clone(&manager), None, &settings(true));

        let status = supervisor.compute_status().await;
        assert_eq!(status.agents.total, 1);
        assert_eq!(status.agents.running, 1);
        assert!(status.last_health_check_unix > 0);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn cycle_restarts_a_stopped_auto_start_agent() {
        let manager = manager_with_agent(true).await;
        let supervisor = Supervisor::new(Arc::clone(&manager), None, &settings(true));

        let agent = manager.get_agent_by_name("watched").unwrap();
        agent.stop().await;
        assert_eq!(manager.running_count(), 0);

        supervisor.run_cycle().await;
        assert_eq!(manager.running_count(), 1);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn recovery_disabled_only_reports() {
        let manager = manager_with_agent(true).await;
        let supervisor = Supervisor::new(Arc::clone(&manager), None, &settings(false));

        manager.get_agent_by_name("watched").unwrap().stop().await;
        supervisor.run_cycle().await;
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn recovery_budget_is_bounded_within_the_window() {
        let manager = manager_with_agent(true).await;
        let supervisor = Supervisor::new(Arc::clone(&manager), None, &settings(true));

        assert!(supervisor.admit_recovery_attempt());
        assert!(supervisor.admit_recovery_attempt());
        assert!(supervisor.admit_recovery_attempt());
        assert!(!supervisor.admit_recovery_attempt());
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn healthy_cycle_resets_the_recovery_budget() {
        let manager = manager_with_agent(true).await;
        let supervisor = Supervisor::new(Arc::clone(&manager), None, &settings(true));

        assert!(supervisor.admit_recovery_attempt());
        assert!(supervisor.admit_recovery_attempt());
        assert!(supervisor.admit_recovery_attempt());
        assert!(!supervisor.admit_recovery_attempt());

        // everything is healthy, so the cycle clears the attempt history
        supervisor.run_cycle().await;
        assert!(supervisor.admit_recovery_attempt());
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_snapshots() {
        let manager = manager_with_agent(false).await;
        let supervisor = Supervisor::new(Arc::clone(&manager), None, &settings(true));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        supervisor.subscribe(Box::new(move |status| {
            sink.lock().unwrap().push(status.agents.total);
        }));

        supervisor.run_cycle().await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
