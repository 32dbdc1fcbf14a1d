//! Process-wide agent registry
//!
//! The [`AgentManager`] creates, starts, stops, and deletes agents from
//! declarative configuration. The registry lock is held only across map
//! operations; agent lifecycle calls happen outside it. Failures on
//! individual agents during configuration load are isolated and reported in
//! the startup summary rather than aborting the rest.

use crate::agent::AgentCore;
use crate::config::{AgentConfig, SystemConfig};
use crate::domain_types::AgentId;
use crate::error::{AgentError, Result};
use crate::functions::providers::FunctionDeps;
use crate::jobs::JobManagerStats;
use crate::router::MessageRouter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Outcome of loading a configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupReport {
    /// Agents created
    pub created: usize,
    /// Agents started (auto_start)
    pub started: usize,
    /// Per-agent failures, as `name: error` strings
    pub failures: Vec<String>,
}

/// Aggregate job counters across all agents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobAggregate {
    /// Jobs waiting across all agents
    pub pending: usize,
    /// Jobs executing across all agents
    pub running: usize,
    /// Total completions since start
    pub completed_total: u64,
    /// Total failures since start
    pub failed_total: u64,
}

/// Process-wide registry of agent cores
pub struct AgentManager {
    router: Arc<MessageRouter>,
    deps: FunctionDeps,
    agents: Mutex<HashMap<AgentId, Arc<AgentCore>>>,
    auto_start: Mutex<HashSet<AgentId>>,
    expected_running: AtomicUsize,
}

impl AgentManager {
    /// Creates a manager routing through `router` with injected function
    /// dependencies
    pub fn new(router: Arc<MessageRouter>, deps: FunctionDeps) -> Self {
        Self {
            router,
            deps,
            agents: Mutex::new(HashMap::new()),
            auto_start: Mutex::new(HashSet::new()),
            expected_running: AtomicUsize::new(0),
        }
    }

    fn registry_lock(&self) -> std::sync::MutexGuard<'_, HashMap<AgentId, Arc<AgentCore>>> {
        self.agents.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The shared message router
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// The injected function dependencies
    pub fn deps(&self) -> &FunctionDeps {
        &self.deps
    }

    /// Creates an agent from configuration and registers it
    ///
    /// # Errors
    ///
    /// Returns a validation error when the configuration is invalid.
    pub fn create_agent_from_config(&self, config: &AgentConfig) -> Result<AgentId> {
        let agent = AgentCore::from_config(config, Arc::clone(&self.router), &self.deps)?;
        let id = agent.id();
        self.registry_lock().insert(id, agent);
        Ok(id)
    }

    /// Starts an agent by ID
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown IDs.
    pub async fn start_agent(&self, id: AgentId) -> Result<()> {
        let agent = self
            .get_agent(id)
            .ok_or_else(|| AgentError::NotFound(format!("agent {id}")))?;
        agent.start().await;
        Ok(())
    }

    /// Stops an agent by ID
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown IDs.
    pub async fn stop_agent(&self, id: AgentId) -> Result<()> {
        let agent = self
            .get_agent(id)
            .ok_or_else(|| AgentError::NotFound(format!("agent {id}")))?;
        agent.stop().await;
        Ok(())
    }

    /// Deletes an agent: removes it from the registry, then stops it
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown IDs.
    pub async fn delete_agent(&self, id: AgentId) -> Result<()> {
        let agent = self
            .registry_lock()
            .remove(&id)
            .ok_or_else(|| AgentError::NotFound(format!("agent {id}")))?;
        self.auto_start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
        agent.stop().await;
        info!(agent_id = %id, "agent deleted");
        Ok(())
    }

    /// All registered agents
    pub fn list_agents(&self) -> Vec<Arc<AgentCore>> {
        self.registry_lock().values().cloned().collect()
    }

    /// Looks up an agent by ID
    pub fn get_agent(&self, id: AgentId) -> Option<Arc<AgentCore>> {
        self.registry_lock().get(&id).cloned()
    }

    /// Looks up an agent by name
    pub fn get_agent_by_name(&self, name: &str) -> Option<Arc<AgentCore>> {
        self.registry_lock()
            .values()
            .find(|agent| agent.name() == name)
            .cloned()
    }

    /// Number of registered agents
    pub fn agent_count(&self) -> usize {
        self.registry_lock().len()
    }

    /// Number of currently running agents
    pub fn running_count(&self) -> usize {
        self.list_agents().iter().filter(|a| a.is_running()).count()
    }

    /// Number of agents expected to run (configured with `auto_start`)
    pub fn expected_running(&self) -> usize {
        self.expected_running.load(Ordering::Relaxed)
    }

    /// Agents configured with `auto_start`, whether or not currently running
    pub fn auto_start_agents(&self) -> Vec<Arc<AgentCore>> {
        let ids: Vec<AgentId> = self
            .auto_start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        ids.into_iter().filter_map(|id| self.get_agent(id)).collect()
    }

    /// Creates and optionally starts every agent in `config`
    ///
    /// Per-agent failures are isolated: one bad entry is logged and counted
    /// in the report without aborting the rest.
    pub async fn load_configuration(&self, config: &SystemConfig) -> StartupReport {
        for function in &config.functions {
            self.deps.register_function_config(function.clone());
        }

        let mut report = StartupReport::default();
        for agent_config in &config.agents {
            match self.create_agent_from_config(agent_config) {
                Ok(id) => {
                    report.created += 1;
                    if agent_config.auto_start {
                        self.auto_start
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .insert(id);
                        if let Err(e) = self.start_agent(id).await {
                            error!(agent = %agent_config.name, "failed to start agent: {e}");
                            report.failures.push(format!("{}: {e}", agent_config.name));
                        } else {
                            report.started += 1;
                        }
                    }
                }
                Err(e) => {
                    error!(agent = %agent_config.name, "failed to create agent: {e}");
                    report.failures.push(format!("{}: {e}", agent_config.name));
                }
            }
        }

        self.expected_running
            .store(config.expected_running(), Ordering::Relaxed);
        info!(
            created = report.created,
            started = report.started,
            failed = report.failures.len(),
            "configuration loaded"
        );
        report
    }

    /// Stop-all-then-recreate cycle from a new configuration; never a
    /// live-patch
    pub async fn reload_configuration(&self, config: &SystemConfig) -> StartupReport {
        warn!("reloading configuration: stopping and recreating all agents");

        let existing: Vec<AgentId> = self.registry_lock().keys().copied().collect();
        for id in existing {
            if let Err(e) = self.delete_agent(id).await {
                warn!(agent_id = %id, "failed to delete agent during reload: {e}");
            }
        }
        self.deps.custom_configs.clear();

        self.load_configuration(config).await
    }

    /// Stops every running agent
    pub async fn stop_all(&self) {
        for agent in self.list_agents() {
            if agent.is_running() {
                agent.stop().await;
            }
        }
    }

    /// Aggregate job counters across all agents
    pub async fn job_aggregate(&self) -> JobAggregate {
        let mut aggregate = JobAggregate::default();
        for agent in self.list_agents() {
            let stats: JobManagerStats = agent.job_stats().await;
            aggregate.pending += stats.pending;
            aggregate.running += stats.running;
            aggregate.completed_total += stats.completed_total;
            aggregate.failed_total += stats.failed_total;
        }
        aggregate
    }

    /// Mean of per-agent average execution times, in milliseconds
    pub fn avg_response_time_ms(&self) -> f64 {
        let agents = self.list_agents();
        let samples: Vec<f64> = agents
            .iter()
            .map(|a| a.statistics().avg_exec_ms)
            .filter(|avg| *avg > 0.0)
            .collect();
        if samples.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let len = samples.len() as f64;
            samples.iter().sum::<f64>() / len
        }
    }

    /// Finds the agent that owns `job_id`, if any
    pub async fn find_job_owner(
        &self,
        job_id: crate::domain_types::JobId,
    ) -> Option<Arc<AgentCore>> {
        for agent in self.list_agents() {
            if agent.job_status(job_id).await.is_ok() {
                return Some(agent);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AgentManager {
        AgentManager::new(Arc::new(MessageRouter::new()), FunctionDeps::offline())
    }

    fn agent_config(name: &str, auto_start: bool) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            functions: vec!["echo".to_string()],
            auto_start,
            max_concurrent_tasks: Some(1),
            ..AgentConfig::default()
        }
    }

    #[tokio::test]
    async fn create_then_delete_restores_the_previous_agent_set() {
        let manager = manager();
        let before: Vec<AgentId> = manager.list_agents().iter().map(|a| a.id()).collect();

        let id = manager
            .create_agent_from_config(&agent_config("ephemeral", false))
            .unwrap();
        assert!(manager.get_agent(id).is_some());

        manager.delete_agent(id).await.unwrap();
        let after: Vec<AgentId> = manager.list_agents().iter().map(|a| a.id()).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn lookup_by_name_and_id_agree() {
        let manager = manager();
        let id = manager
            .create_agent_from_config(&agent_config("findable", false))
            .unwrap();

        let by_name = manager.get_agent_by_name("findable").unwrap();
        assert_eq!(by_name.id(), id);
        assert!(manager.get_agent_by_name("missing").is_none());
    }

    #[tokio::test]
    async fn operations_on_unknown_agents_are_not_found() {
        let manager = manager();
        let ghost = AgentId::generate();
        assert!(matches!(
            manager.start_agent(ghost).await.unwrap_err(),
            AgentError::NotFound(_)
        ));
        assert!(matches!(
            manager.stop_agent(ghost).await.unwrap_err(),
            AgentError::NotFound(_)
        ));
        assert!(matches!(
            manager.delete_agent(ghost).await.unwrap_err(),
            AgentError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn load_configuration_isolates_per_agent_failures() {
        let manager = manager();
        let config = SystemConfig {
            agents: vec![
                agent_config("good", true),
                AgentConfig {
                    name: String::new(),
                    ..AgentConfig::default()
                },
                agent_config("also-good", false),
            ],
            ..SystemConfig::default()
        };

        let report = manager.load_configuration(&config).await;
        assert_eq!(report.created, 2);
        assert_eq!(report.started, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(manager.agent_count(), 2);
        assert_eq!(manager.running_count(), 1);
        assert_eq!(manager.expected_running(), 1);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn reload_recreates_the_population() {
        let manager = manager();
        let first = SystemConfig {
            agents: vec![agent_config("old", true)],
            ..SystemConfig::default()
        };
        manager.load_configuration(&first).await;
        let old_id = manager.get_agent_by_name("old").unwrap().id();

        let second = SystemConfig {
            agents: vec![agent_config("new", false)],
            ..SystemConfig::default()
        };
        let report = manager.reload_configuration(&second).await;
        assert_eq!(report.created, 1);
        assert!(manager.get_agent(old_id).is_none());
        assert!(manager.get_agent_by_name("new").is_some());
        assert_eq!(manager.agent_count(), 1);
    }

    #[tokio::test]
    async fn job_aggregate_sums_across_agents() {
        let manager = manager();
        let config = SystemConfig {
            agents: vec![agent_config("a", true), agent_config("b", true)],
            ..SystemConfig::default()
        };
        manager.load_configuration(&config).await;

        let a = manager.get_agent_by_name("a").unwrap();
        let id = a
            .execute_function_async("echo", crate::data::AgentData::new().with("text", "x"), 0)
            .await
            .unwrap();
        for _ in 0..200 {
            if a.job_status(id).await.unwrap().is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let aggregate = manager.job_aggregate().await;
        assert_eq!(aggregate.completed_total, 1);
        manager.stop_all().await;
    }
}
