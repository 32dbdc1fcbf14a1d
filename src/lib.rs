//! # Kolosal Agents - Multi-Agent Orchestration Runtime
//!
//! A long-running process hosting a population of named, configurable
//! agents. Each agent owns a function registry, a priority job queue with a
//! bounded worker pool, and a three-part memory (conversation, associative
//! vector store, working scratchpad). A process-wide message router is the
//! only cross-agent channel; a supervisor loop health-checks the system and
//! performs bounded auto-recovery; an HTTP management API exposes lifecycle
//! and execution control.
//!
//! ## Architecture
//!
//! ```text
//! ManagementAPI -> AgentManager -> AgentCore -> { JobManager
//!                                               | FunctionRegistry
//!                                               | MemoryManager
//!                                               | MessageRouter }
//! ```
//!
//! The supervisor observes the router, manager, agents, and the external
//! inference backend. Agents never hold references to each other.

pub mod agent;
pub mod backend;
pub mod config;
pub mod data;
pub mod domain_types;
pub mod error;
pub mod functions;
pub mod jobs;
pub mod manager;
pub mod memory;
pub mod rest_api;
pub mod router;
pub mod runtime;
pub mod supervisor;

pub use crate::agent::{AgentCore, AgentRole, AgentStats};
pub use crate::backend::{BackendStatus, InferenceBackend};
pub use crate::config::{AgentConfig, FunctionConfig, InferenceEngineConfig, SystemConfig};
pub use crate::data::{AgentData, AgentDataValue, FunctionResult};
pub use crate::domain_types::{AgentId, AgentName, CapabilityName, FunctionName, JobId, MessageId};
pub use crate::error::{AgentError, Result};
pub use crate::functions::providers::{
    DocumentParser, DocumentStore, EmbeddingProvider, FunctionDeps, InferenceClient,
};
pub use crate::functions::{AgentFunction, FunctionRegistry, FunctionSchema, ParameterType};
pub use crate::jobs::{Job, JobManager, JobStatus};
pub use crate::manager::AgentManager;
pub use crate::memory::{MemoryEntry, MemoryManager, MemoryQuery, MemoryType};
pub use crate::router::{AgentMessage, Destination, MessageRouter};
pub use crate::runtime::AgentRuntime;
pub use crate::supervisor::{Supervisor, SystemStatus};
