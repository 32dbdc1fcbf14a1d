//! A single agent: identity, capabilities, memory, functions, and inbox
//!
//! An [`AgentCore`] owns one function registry, one job manager sized from
//! its configuration, and one memory manager. It never holds a reference to
//! another agent; the message router is the only cross-agent channel.

use crate::config::AgentConfig;
use crate::data::{AgentData, FunctionResult};
use crate::domain_types::{AgentId, AgentName, CapabilityName, JobId, WorkerCount};
use crate::error::{AgentError, Result};
use crate::functions::builtin::register_builtins;
use crate::functions::providers::FunctionDeps;
use crate::functions::{ExecutionContext, FunctionRegistry};
use crate::jobs::{Job, JobManager, JobManagerStats, JobStatus};
use crate::memory::{MemoryEntry, MemoryManager, MemoryType};
use crate::router::{AgentMessage, MessageHandler, MessageRouter};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Role an agent plays in the population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentRole {
    /// Orchestrates other agents
    Coordinator,
    /// Analyzes data and text
    Analyst,
    /// Executes tasks
    Executor,
    /// Domain specialist
    Specialist,
    /// No particular specialization
    #[default]
    Generic,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Coordinator => "COORDINATOR",
            Self::Analyst => "ANALYST",
            Self::Executor => "EXECUTOR",
            Self::Specialist => "SPECIALIST",
            Self::Generic => "GENERIC",
        };
        f.write_str(label)
    }
}

/// Point-in-time statistics snapshot for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    /// Functions executed to completion (success or failure)
    pub functions_executed: u64,
    /// Tool invocations
    pub tools_executed: u64,
    /// Plans created
    pub plans_created: u64,
    /// Entries in the long-term memory store
    pub memory_entries: usize,
    /// Rolling average execution time in milliseconds
    pub avg_exec_ms: f64,
    /// Time of the most recent activity
    pub last_activity: Option<DateTime<Utc>>,
}

/// Internally synchronized execution counters shared between the sync
/// dispatch path and the job workers
#[derive(Debug, Default)]
pub struct StatsRecorder {
    functions_executed: AtomicU64,
    tools_executed: AtomicU64,
    plans_created: AtomicU64,
    total_exec_ms: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl StatsRecorder {
    /// Records one finished function execution
    pub fn record_execution(&self, elapsed_ms: u64) {
        self.functions_executed.fetch_add(1, Ordering::Relaxed);
        self.total_exec_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.touch();
    }

    /// Records one tool invocation
    pub fn record_tool(&self) {
        self.tools_executed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Records one created plan
    pub fn record_plan(&self) {
        self.plans_created.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Functions executed so far
    pub fn functions_executed(&self) -> u64 {
        self.functions_executed.load(Ordering::Relaxed)
    }

    /// Builds a snapshot, attaching the memory entry count
    pub fn snapshot(&self, memory_entries: usize) -> AgentStats {
        let executed = self.functions_executed.load(Ordering::Relaxed);
        let total_ms = self.total_exec_ms.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let avg_exec_ms = if executed == 0 {
            0.0
        } else {
            total_ms as f64 / executed as f64
        };
        let last_ms = self.last_activity_ms.load(Ordering::Relaxed);
        let last_activity = (last_ms != 0)
            .then(|| Utc.timestamp_millis_opt(last_ms).single())
            .flatten();

        AgentStats {
            functions_executed: executed,
            tools_executed: self.tools_executed.load(Ordering::Relaxed),
            plans_created: self.plans_created.load(Ordering::Relaxed),
            memory_entries,
            avg_exec_ms,
            last_activity,
        }
    }
}

/// Core agent implementation
#[derive(Debug)]
pub struct AgentCore {
    id: AgentId,
    name: RwLock<String>,
    agent_type: String,
    role: RwLock<AgentRole>,
    capabilities: RwLock<BTreeSet<String>>,
    running: AtomicBool,
    registry: Arc<FunctionRegistry>,
    jobs: JobManager,
    memory: Arc<MemoryManager>,
    router: Arc<MessageRouter>,
    stats: Arc<StatsRecorder>,
    stop_grace: Duration,
}

impl AgentCore {
    /// Default number of retained conversation messages
    pub const DEFAULT_MEMORY_LIMIT: usize = 100;

    /// Creates an agent from its declarative configuration
    ///
    /// Declared builtin functions are registered immediately; unknown names
    /// warn and are skipped.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the configured name is invalid.
    pub fn from_config(
        config: &AgentConfig,
        router: Arc<MessageRouter>,
        deps: &FunctionDeps,
    ) -> Result<Arc<Self>> {
        let name = AgentName::try_new(config.name.clone())
            .map_err(|e| AgentError::Validation(format!("invalid agent name: {e}")))?;
        for capability in &config.capabilities {
            CapabilityName::try_new(capability.clone()).map_err(|e| {
                AgentError::Validation(format!("invalid capability '{capability}': {e}"))
            })?;
        }

        let id = AgentId::generate();
        let registry = Arc::new(FunctionRegistry::new());
        register_builtins(&registry, &config.functions, deps);

        let memory_limit = config.memory_limit.unwrap_or(Self::DEFAULT_MEMORY_LIMIT);
        let memory = Arc::new(MemoryManager::new(
            id,
            memory_limit,
            Arc::clone(&deps.embeddings),
        ));

        let worker_count = match config.max_concurrent_tasks {
            Some(requested) => WorkerCount::try_new(requested)
                .map_err(|e| {
                    AgentError::Validation(format!("invalid max_concurrent_tasks: {e}"))
                })?
                .as_usize(),
            None => num_cpus::get().min(4),
        };
        let stats = Arc::new(StatsRecorder::default());
        let jobs = JobManager::new(id, Arc::clone(&registry), Arc::clone(&stats), worker_count);

        info!(
            agent_id = %id,
            name = %name,
            role = %config.role,
            workers = worker_count,
            "agent created"
        );

        Ok(Arc::new(Self {
            id,
            name: RwLock::new(name.into_inner()),
            agent_type: config.agent_type.clone(),
            role: RwLock::new(config.role),
            capabilities: RwLock::new(config.capabilities.iter().cloned().collect()),
            running: AtomicBool::new(false),
            registry,
            jobs,
            memory,
            router,
            stats,
            stop_grace: Duration::from_secs(5),
        }))
    }

    /// Immutable agent ID
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Current agent name
    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Free-form type tag
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Current role
    pub fn role(&self) -> AgentRole {
        *self.role.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Renames the agent; only legal while stopped
    ///
    /// # Errors
    ///
    /// Returns a state error while running and a validation error for an
    /// invalid name.
    pub fn set_name(&self, name: &str) -> Result<()> {
        if self.is_running() {
            return Err(AgentError::State(format!(
                "agent {} must be stopped to be renamed",
                self.id
            )));
        }
        let name = AgentName::try_new(name.to_string())
            .map_err(|e| AgentError::Validation(format!("invalid agent name: {e}")))?;
        *self.name.write().unwrap_or_else(std::sync::PoisonError::into_inner) = name.into_inner();
        Ok(())
    }

    /// Changes the role; only legal while stopped
    ///
    /// # Errors
    ///
    /// Returns a state error while running.
    pub fn set_role(&self, role: AgentRole) -> Result<()> {
        if self.is_running() {
            return Err(AgentError::State(format!(
                "agent {} must be stopped to change role",
                self.id
            )));
        }
        *self.role.write().unwrap_or_else(std::sync::PoisonError::into_inner) = role;
        Ok(())
    }

    /// Adds a capability tag
    pub fn add_capability(&self, capability: impl Into<String>) {
        self.capabilities
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(capability.into());
    }

    /// Sorted capability tags
    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Whether the agent is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The agent's function registry; open for external registration
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// The agent's memory manager
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Transitions to running: starts the job workers and registers the
    /// inbox handler with the router. Idempotent with a warn.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(agent_id = %self.id, "agent already running");
            return;
        }

        self.jobs.start().await;

        let weak = Arc::downgrade(self);
        let handler: MessageHandler = Arc::new(move |message| {
            if let Some(agent) = weak.upgrade() {
                agent.handle_message(message);
            }
        });
        self.router.register(self.id, handler);

        info!(agent_id = %self.id, name = %self.name(), "agent started");
    }

    /// Transitions back to registered: deregisters from the router, drains
    /// the job workers, and clears working memory. Idempotent with a warn.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(agent_id = %self.id, "agent already stopped");
            return;
        }

        self.router.unregister(self.id);
        self.jobs.stop(self.stop_grace).await;
        self.memory.clear_working();

        info!(agent_id = %self.id, name = %self.name(), "agent stopped");
    }

    /// Inbox handler body; runs on the router's dispatcher
    ///
    /// Must stay non-blocking: acting on a message means enqueueing a job.
    /// A message arriving while the agent is stopping is treated as a drop.
    fn handle_message(self: Arc<Self>, message: AgentMessage) {
        if !self.is_running() {
            warn!(
                agent_id = %self.id,
                message_id = %message.id,
                "message received while stopped, dropping"
            );
            return;
        }

        debug!(
            agent_id = %self.id,
            from = %message.from,
            message_type = %message.message_type,
            "message received"
        );

        let summary = serde_json::to_string(&message.payload).unwrap_or_default();
        self.memory.add_message(
            "system",
            &format!("message '{}' from {}: {summary}", message.message_type, message.from),
            HashMap::from([("from".to_string(), message.from.to_string())]),
        );

        if message.message_type == "execute_function" {
            let function = message
                .payload
                .get_string("function")
                .unwrap_or_default()
                .to_string();
            let params = message
                .payload
                .get_object("params")
                .cloned()
                .unwrap_or_default();
            let priority =
                i32::try_from(message.payload.get_int("priority").unwrap_or(0)).unwrap_or(0);
            let requester = message.from;
            let agent = Arc::clone(&self);
            // expensive work happens on the agent's own workers, not here
            tokio::spawn(async move {
                if let Err(e) = agent
                    .jobs
                    .submit(function, params, priority, Some(requester))
                    .await
                {
                    warn!(agent_id = %agent.id, "failed to enqueue requested job: {e}");
                }
            });
        }
    }

    /// Synchronous dispatch through the function registry
    pub async fn execute_function(&self, name: &str, params: AgentData) -> FunctionResult {
        let ctx = ExecutionContext::new(self.id);
        let result = self.registry.dispatch(name, params, &ctx).await;
        self.stats.record_execution(result.execution_time_ms);
        result
    }

    /// Queues a function invocation on this agent's job manager
    ///
    /// # Errors
    ///
    /// Returns a state error when the agent is stopped.
    pub async fn execute_function_async(
        &self,
        name: &str,
        params: AgentData,
        priority: i32,
    ) -> Result<JobId> {
        if !self.is_running() {
            return Err(AgentError::State(format!(
                "agent {} is not running",
                self.id
            )));
        }
        self.jobs.submit(name, params, priority, Some(self.id)).await
    }

    /// Sends a direct message through the router
    pub fn send_message(&self, to: AgentId, message_type: &str, payload: AgentData) {
        self.router
            .route(AgentMessage::direct(self.id, to, message_type, payload));
    }

    /// Broadcasts a message to all other registered agents
    pub fn broadcast_message(&self, message_type: &str, payload: AgentData) {
        self.router
            .broadcast(AgentMessage::broadcast(self.id, message_type, payload));
    }

    /// Stores a long-term memory
    ///
    /// # Errors
    ///
    /// Returns a dependency error when embedding fails.
    pub async fn store_memory(&self, content: &str, entry_type: MemoryType) -> Result<String> {
        self.memory.store(content, entry_type, HashMap::new()).await
    }

    /// Recalls the memories most relevant to `query`
    ///
    /// # Errors
    ///
    /// Returns a dependency error when embedding fails.
    pub async fn recall_memories(&self, query: &str, max_results: usize) -> Result<Vec<MemoryEntry>> {
        self.memory.retrieve_relevant(query, max_results).await
    }

    /// Sets a working-memory context blob
    pub fn set_working_context(&self, key: &str, data: AgentData) {
        self.memory.set_working_context(key, data);
    }

    /// Reads a working-memory context blob
    pub fn get_working_context(&self, key: &str) -> Option<AgentData> {
        self.memory.get_working_context(key)
    }

    /// Statistics snapshot
    pub fn statistics(&self) -> AgentStats {
        self.stats.snapshot(self.memory.stats().vector_count)
    }

    /// Status of one of this agent's jobs
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown job IDs.
    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        self.jobs.status(job_id).await
    }

    /// Result of one of this agent's terminal jobs
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown jobs and a state error for
    /// non-terminal jobs.
    pub async fn job_result(&self, job_id: JobId) -> Result<FunctionResult> {
        self.jobs.result(job_id).await
    }

    /// Full snapshot of one of this agent's jobs
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown job IDs.
    pub async fn job(&self, job_id: JobId) -> Result<Job> {
        self.jobs.job(job_id).await
    }

    /// Cancels one of this agent's jobs
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown job IDs.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<bool> {
        self.jobs.cancel(job_id).await
    }

    /// Queue statistics for this agent's job manager
    pub async fn job_stats(&self) -> JobManagerStats {
        self.jobs.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn test_config(name: &str) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            functions: vec!["echo".to_string(), "add".to_string()],
            capabilities: vec!["text_processing".to_string()],
            max_concurrent_tasks: Some(1),
            ..AgentConfig::default()
        }
    }

    fn make_agent(name: &str) -> Arc<AgentCore> {
        let router = Arc::new(MessageRouter::new());
        AgentCore::from_config(&test_config(name), router, &FunctionDeps::offline()).unwrap()
    }

    #[tokio::test]
    async fn invalid_name_is_a_validation_error() {
        let router = Arc::new(MessageRouter::new());
        let config = AgentConfig {
            name: String::new(),
            ..AgentConfig::default()
        };
        let err = AgentCore::from_config(&config, router, &FunctionDeps::offline()).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[tokio::test]
    async fn double_start_and_double_stop_are_idempotent() {
        let agent = make_agent("idem");
        agent.start().await;
        agent.start().await;
        assert!(agent.is_running());
        agent.stop().await;
        agent.stop().await;
        assert!(!agent.is_running());
    }

    #[tokio::test]
    async fn start_registers_and_stop_deregisters_with_router() {
        let router = Arc::new(MessageRouter::new());
        let agent =
            AgentCore::from_config(&test_config("routed"), Arc::clone(&router), &FunctionDeps::offline())
                .unwrap();

        assert!(!router.is_registered(agent.id()));
        agent.start().await;
        assert!(router.is_registered(agent.id()));
        agent.stop().await;
        assert!(!router.is_registered(agent.id()));
    }

    #[tokio::test]
    async fn sync_execution_updates_statistics() {
        let agent = make_agent("stats");
        let result = agent
            .execute_function("echo", AgentData::new().with("text", "hi"))
            .await;
        assert!(result.success);
        assert_eq!(agent.statistics().functions_executed, 1);
        assert!(agent.statistics().last_activity.is_some());
    }

    #[tokio::test]
    async fn async_execution_requires_running_agent() {
        let agent = make_agent("stopped");
        let err = agent
            .execute_function_async("echo", AgentData::new().with("text", "x"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::State(_)));
    }

    #[tokio::test]
    async fn name_and_role_only_change_while_stopped() {
        let agent = make_agent("mutable");
        agent.start().await;
        assert!(matches!(agent.set_name("other"), Err(AgentError::State(_))));
        assert!(matches!(
            agent.set_role(AgentRole::Analyst),
            Err(AgentError::State(_))
        ));
        agent.stop().await;

        agent.set_name("other").unwrap();
        agent.set_role(AgentRole::Analyst).unwrap();
        assert_eq!(agent.name(), "other");
        assert_eq!(agent.role(), AgentRole::Analyst);
    }

    #[tokio::test]
    async fn stop_clears_working_memory() {
        let agent = make_agent("working");
        agent.start().await;
        agent.set_working_context("task", AgentData::new().with("step", 1));
        assert!(agent.get_working_context("task").is_some());
        agent.stop().await;
        assert!(agent.get_working_context("task").is_none());
    }

    #[tokio::test]
    async fn execute_function_message_enqueues_a_job() {
        let router = Arc::new(MessageRouter::new());
        router.start();

        let deps = FunctionDeps::offline();
        let sender =
            AgentCore::from_config(&test_config("sender"), Arc::clone(&router), &deps).unwrap();
        let receiver =
            AgentCore::from_config(&test_config("receiver"), Arc::clone(&router), &deps).unwrap();
        sender.start().await;
        receiver.start().await;

        let payload = AgentData::new()
            .with("function", "echo")
            .with("params", AgentData::new().with("text", "from message"));
        sender.send_message(receiver.id(), "execute_function", payload);

        let mut executed = 0;
        for _ in 0..200 {
            executed = receiver.job_stats().await.completed_total;
            if executed > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(executed, 1);

        receiver.stop().await;
        sender.stop().await;
        router.stop().await;
    }
}
