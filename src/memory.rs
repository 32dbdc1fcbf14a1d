//! Per-agent memory: conversation log, associative vector store, and
//! working scratchpad
//!
//! Each agent owns one [`MemoryManager`] with three sub-stores, each behind
//! its own lock so operations on the same agent serialize while different
//! agents proceed independently. Embeddings are produced by the injected
//! provider before any lock is taken; no lock is ever held across an await.

use crate::data::AgentData;
use crate::domain_types::AgentId;
use crate::error::Result;
use crate::functions::providers::EmbeddingProvider;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Classification of a stored memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A single turn of conversation
    Conversation,
    /// A piece of standalone knowledge
    Fact,
    /// A named how-to
    Procedure,
    /// Task-scoped context
    Context,
    /// Anything else
    #[default]
    General,
}

/// A single stored recollection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Store-assigned unique ID
    pub id: String,
    /// Memory content
    pub content: String,
    /// Classification
    pub entry_type: MemoryType,
    /// Free-form string metadata
    pub metadata: HashMap<String, String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last read time
    pub accessed_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Number of reads via get/search
    pub access_count: u32,
    /// Embedding vector, when the entry went through the provider
    pub embedding: Option<Vec<f32>>,
}

impl MemoryEntry {
    /// Creates an entry with fresh timestamps and a random ID
    pub fn new(content: impl Into<String>, entry_type: MemoryType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            entry_type,
            metadata: HashMap::new(),
            created_at: now,
            accessed_at: now,
            updated_at: now,
            access_count: 0,
            embedding: None,
        }
    }

    /// Attaches metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    fn touch_access(&mut self) {
        self.access_count += 1;
        self.accessed_at = Utc::now();
    }
}

/// Filter set for searching the vector store
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Case-insensitive substring match over content
    pub text: Option<String>,
    /// Restrict to these types; empty means all
    pub types: Vec<MemoryType>,
    /// Exact-match metadata filters
    pub metadata_filters: HashMap<String, String>,
    /// Only entries created at or after this time
    pub after: Option<DateTime<Utc>>,
    /// Only entries created at or before this time
    pub before: Option<DateTime<Utc>>,
    /// Maximum number of results
    pub max_results: usize,
}

impl MemoryQuery {
    /// Creates a query with a text filter and the default result cap
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            max_results: 10,
            ..Self::default()
        }
    }

    fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(text) = &self.text {
            if !entry.content.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&entry.entry_type) {
            return false;
        }
        for (key, value) in &self.metadata_filters {
            if entry.metadata.get(key) != Some(value) {
                return false;
            }
        }
        if let Some(after) = self.after {
            if entry.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if entry.created_at > before {
                return false;
            }
        }
        true
    }
}

/// Cosine similarity between two vectors
///
/// Returns 0.0 for mismatched dimensions or zero-length inputs; the result
/// is symmetric and falls within [-1, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Bounded short-term conversation log
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationMemory {
    messages: VecDeque<MemoryEntry>,
    max_messages: usize,
}

impl ConversationMemory {
    /// Creates a log bounded to `max_messages` entries
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Appends a message, dropping the oldest entries past the bound
    pub fn add_message(
        &mut self,
        role: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) {
        let mut entry =
            MemoryEntry::new(content, MemoryType::Conversation).with_metadata(metadata);
        entry.metadata.insert("role".to_string(), role.to_string());
        self.messages.push_back(entry);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    /// The most recent `count` messages, oldest first
    pub fn recent_messages(&self, count: usize) -> Vec<MemoryEntry> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// The most recent messages concatenated newest-last, trimmed at message
    /// boundaries to fit `max_chars`
    pub fn context_window(&self, max_chars: usize) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut used = 0;
        for entry in self.messages.iter().rev() {
            let role = entry.metadata.get("role").map_or("unknown", String::as_str);
            let line = format!("{role}: {}", entry.content);
            // +1 for the joining newline
            if used + line.len() + 1 > max_chars && !lines.is_empty() {
                break;
            }
            if line.len() > max_chars && lines.is_empty() {
                break;
            }
            used += line.len() + 1;
            lines.push(line);
        }
        lines.reverse();
        lines.join("\n")
    }

    /// Number of retained messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops all messages
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Long-term associative store keyed by entry ID
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VectorMemory {
    entries: HashMap<String, MemoryEntry>,
    #[serde(skip)]
    type_index: HashMap<MemoryType, HashSet<String>>,
}

impl VectorMemory {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_type_index(&mut self) {
        self.type_index.clear();
        for (id, entry) in &self.entries {
            self.type_index
                .entry(entry.entry_type)
                .or_default()
                .insert(id.clone());
        }
    }

    /// Inserts or replaces an entry
    pub fn store(&mut self, entry: MemoryEntry) {
        if let Some(previous) = self.entries.get(&entry.id) {
            if let Some(ids) = self.type_index.get_mut(&previous.entry_type) {
                ids.remove(&entry.id);
            }
        }
        self.type_index
            .entry(entry.entry_type)
            .or_default()
            .insert(entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Updates an entry's content, refreshing `updated_at`
    pub fn update(&mut self, id: &str, content: impl Into<String>) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.content = content.into();
                entry.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Removes an entry by ID
    pub fn remove(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                if let Some(ids) = self.type_index.get_mut(&entry.entry_type) {
                    ids.remove(id);
                }
                true
            }
            None => false,
        }
    }

    /// Fetches an entry, counting the access
    pub fn get(&mut self, id: &str) -> Option<MemoryEntry> {
        let entry = self.entries.get_mut(id)?;
        entry.touch_access();
        Some(entry.clone())
    }

    /// Filter search; every hit counts as an access
    pub fn search(&mut self, query: &MemoryQuery) -> Vec<MemoryEntry> {
        let max_results = if query.max_results == 0 {
            usize::MAX
        } else {
            query.max_results
        };

        let mut matching: Vec<String> = self
            .entries
            .values()
            .filter(|entry| query.matches(entry))
            .map(|entry| entry.id.clone())
            .collect();
        // newest first, deterministic across runs
        matching.sort_by(|a, b| {
            let ea = &self.entries[a];
            let eb = &self.entries[b];
            eb.created_at.cmp(&ea.created_at).then_with(|| a.cmp(b))
        });
        matching.truncate(max_results);

        matching
            .iter()
            .filter_map(|id| {
                let entry = self.entries.get_mut(id)?;
                entry.touch_access();
                Some(entry.clone())
            })
            .collect()
    }

    /// Top-k entries by cosine similarity to `query_embedding`, descending;
    /// ties break by access count then update time, both descending
    pub fn similarity_search(
        &mut self,
        query_embedding: &[f32],
        max_results: usize,
    ) -> Vec<(f64, MemoryEntry)> {
        let mut scored: Vec<(f64, String)> = self
            .entries
            .values()
            .filter_map(|entry| {
                let embedding = entry.embedding.as_ref()?;
                Some((cosine_similarity(query_embedding, embedding), entry.id.clone()))
            })
            .collect();

        scored.sort_by(|(score_a, id_a), (score_b, id_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ea = &self.entries[id_a];
                    let eb = &self.entries[id_b];
                    eb.access_count
                        .cmp(&ea.access_count)
                        .then_with(|| eb.updated_at.cmp(&ea.updated_at))
                })
        });
        scored.truncate(max_results);

        scored
            .into_iter()
            .filter_map(|(score, id)| {
                let entry = self.entries.get_mut(&id)?;
                entry.touch_access();
                Some((score, entry.clone()))
            })
            .collect()
    }

    /// All entries of one type, without counting accesses
    pub fn entries_by_type(&self, entry_type: MemoryType) -> Vec<MemoryEntry> {
        self.type_index
            .get(&entry_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes entries older than `max_age` that were accessed fewer than
    /// five times; frequently used entries are never reclaimed
    pub fn cleanup(&mut self, max_age: ChronoDuration) -> usize {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.created_at < cutoff && entry.access_count < 5)
            .map(|entry| entry.id.clone())
            .collect();
        for id in &stale {
            self.remove(id);
        }
        stale.len()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scratchpad for the current task
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    context: HashMap<String, AgentData>,
    goal_stack: Vec<String>,
    variables: HashMap<String, String>,
    current_task: String,
}

impl WorkingMemory {
    /// Creates an empty scratchpad
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a keyed context blob
    pub fn set_context(&mut self, key: impl Into<String>, data: AgentData) {
        self.context.insert(key.into(), data);
    }

    /// Reads a keyed context blob
    pub fn get_context(&self, key: &str) -> Option<AgentData> {
        self.context.get(key).cloned()
    }

    /// Whether a context key is present
    pub fn has_context(&self, key: &str) -> bool {
        self.context.contains_key(key)
    }

    /// Pushes a goal onto the stack
    pub fn push_goal(&mut self, goal: impl Into<String>) {
        self.goal_stack.push(goal.into());
    }

    /// Pops the top goal
    pub fn pop_goal(&mut self) -> Option<String> {
        self.goal_stack.pop()
    }

    /// Peeks at the top goal
    pub fn current_goal(&self) -> Option<&str> {
        self.goal_stack.last().map(String::as_str)
    }

    /// The full goal stack, bottom first
    pub fn goals(&self) -> &[String] {
        &self.goal_stack
    }

    /// Sets a named string variable
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Reads a named string variable
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Sets the current task label
    pub fn set_current_task(&mut self, task: impl Into<String>) {
        self.current_task = task.into();
    }

    /// The current task label
    pub fn current_task(&self) -> &str {
        &self.current_task
    }

    /// Number of context entries, goals, and variables held
    pub fn item_count(&self) -> usize {
        self.context.len() + self.goal_stack.len() + self.variables.len()
    }

    /// Drops everything
    pub fn clear(&mut self) {
        self.context.clear();
        self.goal_stack.clear();
        self.variables.clear();
        self.current_task.clear();
    }
}

/// Aggregate memory statistics for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Messages in the conversation log
    pub conversation_count: usize,
    /// Entries in the vector store
    pub vector_count: usize,
    /// Items across the working scratchpad
    pub working_items: usize,
}

#[derive(Serialize, Deserialize)]
struct MemorySnapshot {
    conversation: ConversationMemory,
    vector: VectorMemory,
    working: WorkingMemory,
}

/// Comprehensive per-agent memory manager
pub struct MemoryManager {
    agent_id: AgentId,
    conversation: Mutex<ConversationMemory>,
    vector: Mutex<VectorMemory>,
    working: Mutex<WorkingMemory>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

impl MemoryManager {
    /// Creates the memory triad for `agent_id`
    pub fn new(
        agent_id: AgentId,
        max_conversation_messages: usize,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            agent_id,
            conversation: Mutex::new(ConversationMemory::new(max_conversation_messages)),
            vector: Mutex::new(VectorMemory::new()),
            working: Mutex::new(WorkingMemory::new()),
            embeddings,
        }
    }

    fn conversation_lock(&self) -> std::sync::MutexGuard<'_, ConversationMemory> {
        self.conversation.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn vector_lock(&self) -> std::sync::MutexGuard<'_, VectorMemory> {
        self.vector.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn working_lock(&self) -> std::sync::MutexGuard<'_, WorkingMemory> {
        self.working.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Appends a conversation message
    pub fn add_message(&self, role: &str, content: &str, metadata: HashMap<String, String>) {
        self.conversation_lock().add_message(role, content, metadata);
    }

    /// The most recent `count` conversation messages, oldest first
    pub fn recent_messages(&self, count: usize) -> Vec<MemoryEntry> {
        self.conversation_lock().recent_messages(count)
    }

    /// Recent conversation concatenated to fit `max_chars`
    pub fn context_window(&self, max_chars: usize) -> String {
        self.conversation_lock().context_window(max_chars)
    }

    /// Stores a long-term memory, embedding its content first
    pub async fn store(
        &self,
        content: &str,
        entry_type: MemoryType,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let embedding = self.embeddings.embed(content).await?;
        let mut entry = MemoryEntry::new(content, entry_type).with_metadata(metadata);
        entry.embedding = Some(embedding);
        let id = entry.id.clone();
        self.vector_lock().store(entry);
        debug!(agent_id = %self.agent_id, memory_id = %id, "stored memory entry");
        Ok(id)
    }

    /// Stores a conversation turn into both the short-term log and the
    /// long-term store
    pub async fn store_conversation(&self, role: &str, content: &str) -> Result<String> {
        self.add_message(role, content, HashMap::new());
        let metadata = HashMap::from([("role".to_string(), role.to_string())]);
        self.store(content, MemoryType::Conversation, metadata).await
    }

    /// Stores a fact
    pub async fn store_fact(
        &self,
        fact: &str,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        self.store(fact, MemoryType::Fact, metadata).await
    }

    /// Stores a named procedure
    pub async fn store_procedure(&self, procedure: &str, name: &str) -> Result<String> {
        let metadata = HashMap::from([("name".to_string(), name.to_string())]);
        self.store(procedure, MemoryType::Procedure, metadata).await
    }

    /// Fetches one entry by ID, counting the access
    pub fn get(&self, id: &str) -> Option<MemoryEntry> {
        self.vector_lock().get(id)
    }

    /// Filter search over the long-term store
    pub fn search(&self, query: &MemoryQuery) -> Vec<MemoryEntry> {
        self.vector_lock().search(query)
    }

    /// Top-k semantic search by cosine similarity
    pub async fn semantic_search(&self, text: &str, k: usize) -> Result<Vec<(f64, MemoryEntry)>> {
        let query_embedding = self.embeddings.embed(text).await?;
        Ok(self.vector_lock().similarity_search(&query_embedding, k))
    }

    /// The `k` memories most relevant to `query`
    pub async fn retrieve_relevant(&self, query: &str, k: usize) -> Result<Vec<MemoryEntry>> {
        Ok(self
            .semantic_search(query, k)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    /// Relevant long-term memories plus recent conversation, formatted and
    /// trimmed to `max_chars`
    pub async fn context_for_query(&self, query: &str, max_chars: usize) -> Result<String> {
        let mut context = String::new();
        for entry in self.retrieve_relevant(query, 5).await? {
            let line = format!("- {}\n", entry.content);
            if context.len() + line.len() > max_chars / 2 {
                break;
            }
            context.push_str(&line);
        }
        let remaining = max_chars.saturating_sub(context.len());
        let window = self.context_window(remaining);
        if !window.is_empty() {
            context.push_str(&window);
        }
        Ok(context)
    }

    /// Removes a long-term entry
    pub fn remove(&self, id: &str) -> bool {
        self.vector_lock().remove(id)
    }

    /// Expires stale, rarely used long-term entries
    pub fn cleanup(&self, max_age: ChronoDuration) -> usize {
        let removed = self.vector_lock().cleanup(max_age);
        if removed > 0 {
            debug!(agent_id = %self.agent_id, removed, "cleaned up memory entries");
        }
        removed
    }

    /// Sets a working-memory context blob
    pub fn set_working_context(&self, key: impl Into<String>, data: AgentData) {
        self.working_lock().set_context(key, data);
    }

    /// Reads a working-memory context blob
    pub fn get_working_context(&self, key: &str) -> Option<AgentData> {
        self.working_lock().get_context(key)
    }

    /// Pushes a goal
    pub fn push_goal(&self, goal: impl Into<String>) {
        self.working_lock().push_goal(goal);
    }

    /// Pops the top goal
    pub fn pop_goal(&self) -> Option<String> {
        self.working_lock().pop_goal()
    }

    /// Peeks at the top goal
    pub fn current_goal(&self) -> Option<String> {
        self.working_lock().current_goal().map(ToString::to_string)
    }

    /// Sets a working variable
    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        self.working_lock().set_variable(name, value);
    }

    /// Reads a working variable
    pub fn get_variable(&self, name: &str) -> Option<String> {
        self.working_lock().get_variable(name).map(ToString::to_string)
    }

    /// Sets the current task label
    pub fn set_current_task(&self, task: impl Into<String>) {
        self.working_lock().set_current_task(task);
    }

    /// The current task label
    pub fn current_task(&self) -> String {
        self.working_lock().current_task().to_string()
    }

    /// Clears the working scratchpad; called when the agent stops
    pub fn clear_working(&self) {
        self.working_lock().clear();
    }

    /// Aggregate statistics
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            conversation_count: self.conversation_lock().len(),
            vector_count: self.vector_lock().len(),
            working_items: self.working_lock().item_count(),
        }
    }

    /// Serializes all three sub-stores into opaque bytes
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let snapshot = {
            let conversation = self.conversation_lock();
            let vector = self.vector_lock();
            let working = self.working_lock();
            serde_json::to_vec(&SnapshotRef {
                conversation: &conversation,
                vector: &vector,
                working: &working,
            })?
        };
        Ok(snapshot)
    }

    /// Restores all three sub-stores from bytes produced by [`serialize`]
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the bytes do not decode.
    ///
    /// [`serialize`]: MemoryManager::serialize
    pub fn deserialize(&self, bytes: &[u8]) -> Result<()> {
        let snapshot: MemorySnapshot = serde_json::from_slice(bytes)?;
        let mut vector = snapshot.vector;
        vector.rebuild_type_index();
        *self.conversation_lock() = snapshot.conversation;
        *self.vector_lock() = vector;
        *self.working_lock() = snapshot.working;
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    conversation: &'a ConversationMemory,
    vector: &'a VectorMemory,
    working: &'a WorkingMemory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::providers::HashEmbeddingProvider;

    fn manager() -> MemoryManager {
        MemoryManager::new(
            AgentId::generate(),
            100,
            Arc::new(HashEmbeddingProvider::new(32)),
        )
    }

    #[test]
    fn conversation_memory_drops_oldest_past_bound() {
        let mut memory = ConversationMemory::new(3);
        for i in 0..5 {
            memory.add_message("user", &format!("message {i}"), HashMap::new());
        }
        assert_eq!(memory.len(), 3);
        let recent = memory.recent_messages(10);
        assert_eq!(recent[0].content, "message 2");
        assert_eq!(recent[2].content, "message 4");
    }

    #[test]
    fn context_window_is_newest_last_and_trims_at_boundaries() {
        let mut memory = ConversationMemory::new(10);
        memory.add_message("user", "first", HashMap::new());
        memory.add_message("assistant", "second", HashMap::new());
        memory.add_message("user", "third", HashMap::new());

        let window = memory.context_window(10_000);
        let lines: Vec<&str> = window.lines().collect();
        assert_eq!(lines, ["user: first", "assistant: second", "user: third"]);

        // tight budget keeps only the newest full message
        let window = memory.context_window("user: third".len() + 1);
        assert_eq!(window, "user: third");
    }

    #[test]
    fn context_window_larger_than_available_returns_everything() {
        let mut memory = ConversationMemory::new(10);
        memory.add_message("user", "only", HashMap::new());
        assert_eq!(memory.context_window(1_000_000), "user: only");
    }

    #[test]
    fn cosine_similarity_bounds_and_symmetry() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        let c = [1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert!((cosine_similarity(&a, &c) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn search_filters_by_text_type_and_metadata() {
        let mut store = VectorMemory::new();
        let mut entry = MemoryEntry::new("Rust ownership rules", MemoryType::Fact);
        entry.metadata.insert("topic".to_string(), "rust".to_string());
        store.store(entry);
        store.store(MemoryEntry::new("Python typing", MemoryType::Fact));
        store.store(MemoryEntry::new("rust procedure", MemoryType::Procedure));

        let hits = store.search(&MemoryQuery::text("RUST"));
        assert_eq!(hits.len(), 2);

        let mut query = MemoryQuery::text("rust");
        query.types = vec![MemoryType::Fact];
        assert_eq!(store.search(&query).len(), 1);

        let mut query = MemoryQuery::default();
        query.max_results = 10;
        query
            .metadata_filters
            .insert("topic".to_string(), "rust".to_string());
        let hits = store.search(&query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Rust ownership rules");
    }

    #[test]
    fn access_counting_happens_on_get_and_search() {
        let mut store = VectorMemory::new();
        let entry = MemoryEntry::new("counted", MemoryType::General);
        let id = entry.id.clone();
        store.store(entry);

        store.get(&id);
        store.search(&MemoryQuery::text("counted"));
        assert_eq!(store.get(&id).unwrap().access_count, 3);
    }

    #[test]
    fn cleanup_spares_frequently_accessed_entries() {
        let mut store = VectorMemory::new();

        let mut stale = MemoryEntry::new("stale", MemoryType::General);
        stale.created_at = Utc::now() - ChronoDuration::days(60);
        let stale_id = stale.id.clone();
        store.store(stale);

        let mut protected = MemoryEntry::new("protected", MemoryType::General);
        protected.created_at = Utc::now() - ChronoDuration::days(60);
        protected.access_count = 5;
        let protected_id = protected.id.clone();
        store.store(protected);

        let removed = store.cleanup(ChronoDuration::days(30));
        assert_eq!(removed, 1);
        assert!(store.get(&stale_id).is_none());
        assert!(store.get(&protected_id).is_some());
    }

    #[test]
    fn cleanup_with_zero_age_keeps_protected_entries() {
        let mut store = VectorMemory::new();
        let mut entry = MemoryEntry::new("busy", MemoryType::General);
        entry.created_at = Utc::now() - ChronoDuration::seconds(1);
        entry.access_count = 9;
        store.store(entry);

        assert_eq!(store.cleanup(ChronoDuration::zero()), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn semantic_search_ranks_descending_and_caps_at_k() {
        let manager = manager();
        manager
            .store("the borrow checker enforces ownership", MemoryType::Fact, HashMap::new())
            .await
            .unwrap();
        manager
            .store("tokio schedules async tasks", MemoryType::Fact, HashMap::new())
            .await
            .unwrap();
        manager
            .store("grocery list: milk and eggs", MemoryType::General, HashMap::new())
            .await
            .unwrap();

        let results = manager
            .semantic_search("the borrow checker enforces ownership", 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].0 >= results[1].0);
        assert_eq!(results[0].1.content, "the borrow checker enforces ownership");
    }

    #[tokio::test]
    async fn semantic_search_on_empty_store_returns_nothing() {
        let manager = manager();
        let results = manager.semantic_search("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn working_memory_goal_stack_and_clear() {
        let manager = manager();
        manager.push_goal("outer");
        manager.push_goal("inner");
        assert_eq!(manager.current_goal().as_deref(), Some("inner"));
        assert_eq!(manager.pop_goal().as_deref(), Some("inner"));

        manager.set_variable("k", "v");
        manager.set_current_task("testing");
        manager.set_working_context("ctx", AgentData::new().with("n", 1));

        manager.clear_working();
        assert!(manager.current_goal().is_none());
        assert!(manager.get_variable("k").is_none());
        assert_eq!(manager.current_task(), "");
        assert!(manager.get_working_context("ctx").is_none());
    }

    #[tokio::test]
    async fn serialize_round_trip_preserves_entries_and_embeddings() {
        let manager = manager();
        manager.add_message("user", "hello there", HashMap::new());
        let id = manager
            .store(
                "a well-known fact",
                MemoryType::Fact,
                HashMap::from([("source".to_string(), "test".to_string())]),
            )
            .await
            .unwrap();
        manager.set_variable("key", "value");

        let bytes = manager.serialize().unwrap();

        let restored = MemoryManager::new(
            AgentId::generate(),
            100,
            Arc::new(HashEmbeddingProvider::new(32)),
        );
        restored.deserialize(&bytes).unwrap();

        let entry = restored.get(&id).unwrap();
        assert_eq!(entry.content, "a well-known fact");
        assert_eq!(entry.metadata.get("source").map(String::as_str), Some("test"));
        assert!(entry.embedding.is_some());
        assert_eq!(restored.stats().conversation_count, 1);
        assert_eq!(restored.get_variable("key").as_deref(), Some("value"));

        // the rebuilt type index serves type-filtered queries
        let mut query = MemoryQuery::default();
        query.types = vec![MemoryType::Fact];
        query.max_results = 10;
        assert_eq!(restored.search(&query).len(), 1);
    }
}
