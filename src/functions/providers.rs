//! External collaborator contracts for builtin functions
//!
//! Inference, embeddings, document parsing, and document retrieval live
//! outside this runtime. Builtin functions reach them through the traits in
//! this module; the concrete implementations are injected at agent creation
//! so no function holds singleton state.

use crate::data::AgentData;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Chat-completion style client for the LLM inference backend
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Produces a completion for `prompt`, optionally steered by a system prompt
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        params: &AgentData,
    ) -> Result<String>;
}

/// HTTP client for an OpenAI-compatible chat completion endpoint
pub struct HttpInferenceClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpInferenceClient {
    /// Creates a client for the backend at `base_url` using `model`
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        params: &AgentData,
    ) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max_tokens) = params.get_int("max_tokens") {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = params.get_float("temperature") {
            body["temperature"] = json!(temperature);
        }

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(%url, "sending inference request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::dependency("llm_backend", e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::dependency(
                "llm_backend",
                format!("inference request failed with status {}", response.status()),
            ));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::dependency("llm_backend", e.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| {
                AgentError::dependency("llm_backend", "response missing message content")
            })
    }
}

/// Inference client used when no backend is configured
///
/// Every call fails with a dependency error naming the backend, which the
/// dispatch layer converts into a failed `FunctionResult`.
#[derive(Debug, Default)]
pub struct UnconfiguredInferenceClient;

#[async_trait]
impl InferenceClient for UnconfiguredInferenceClient {
    async fn complete(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
        _params: &AgentData,
    ) -> Result<String> {
        Err(AgentError::dependency(
            "llm_backend",
            "no inference backend configured",
        ))
    }
}

/// Produces fixed-dimension embedding vectors for text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds `text` into a vector of `dimension()` floats
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of every vector this provider produces
    fn dimension(&self) -> usize;
}

/// Deterministic hash-seeded embedding provider
///
/// Produces stable unit-length pseudo-embeddings without an external model.
/// Identical texts embed identically, so similarity ranking is exercisable
/// in tests and offline deployments.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    /// Creates a provider emitting vectors of `dimension` floats
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn seed_from(text: &str) -> u64 {
        // FNV-1a over the lowercased bytes keeps the embedding
        // case-insensitive like the retrieval layer it feeds.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut state = Self::seed_from(text) | 1;
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // xorshift64 keeps the sequence deterministic per seed
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            #[allow(clippy::cast_precision_loss)]
            let component = ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0;
            #[allow(clippy::cast_possible_truncation)]
            vector.push(component as f32);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for component in &mut vector {
                *component /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Extracts text from binary document formats
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Extracts text content from a PDF file
    async fn parse_pdf(&self, path: &str) -> Result<String>;

    /// Extracts text content from a DOCX file
    async fn parse_docx(&self, path: &str) -> Result<String>;
}

/// Parser used when no document-parsing service is configured
#[derive(Debug, Default)]
pub struct UnconfiguredDocumentParser;

#[async_trait]
impl DocumentParser for UnconfiguredDocumentParser {
    async fn parse_pdf(&self, _path: &str) -> Result<String> {
        Err(AgentError::dependency(
            "document_parser",
            "no document parser configured",
        ))
    }

    async fn parse_docx(&self, _path: &str) -> Result<String> {
        Err(AgentError::dependency(
            "document_parser",
            "no document parser configured",
        ))
    }
}

/// A document returned from a retrieval query
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    /// Store-assigned document ID
    pub id: String,
    /// Document content
    pub content: String,
    /// Similarity score against the query, higher is more relevant
    pub score: f64,
}

/// Vector-backed document store used by the retrieval functions
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Adds a document, returning its ID
    async fn add_document(
        &self,
        collection: &str,
        id: Option<String>,
        content: &str,
    ) -> Result<String>;

    /// Removes a document by ID; returns whether it existed
    async fn remove_document(&self, collection: &str, id: &str) -> Result<bool>;

    /// Retrieves the `limit` most relevant documents for `query`
    async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>>;
}

/// In-process document store ranking by embedding cosine similarity
///
/// Stands in for the external vector database; collections are held in
/// memory and scored with the injected embedding provider.
pub struct InMemoryDocumentStore {
    embeddings: Arc<dyn EmbeddingProvider>,
    collections: DashMap<String, Vec<StoredDocument>>,
}

struct StoredDocument {
    id: String,
    content: String,
    embedding: Vec<f32>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store scoring with `embeddings`
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embeddings,
            collections: DashMap::new(),
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        f64::from(dot / (norm_a * norm_b))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn add_document(
        &self,
        collection: &str,
        id: Option<String>,
        content: &str,
    ) -> Result<String> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let embedding = self.embeddings.embed(content).await?;

        let mut documents = self.collections.entry(collection.to_string()).or_default();
        documents.retain(|doc| doc.id != id);
        documents.push(StoredDocument {
            id: id.clone(),
            content: content.to_string(),
            embedding,
        });
        Ok(id)
    }

    async fn remove_document(&self, collection: &str, id: &str) -> Result<bool> {
        let Some(mut documents) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = documents.len();
        documents.retain(|doc| doc.id != id);
        Ok(documents.len() < before)
    }

    async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let query_embedding = self.embeddings.embed(query).await?;
        let Some(documents) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<RetrievedDocument> = documents
            .iter()
            .map(|doc| RetrievedDocument {
                id: doc.id.clone(),
                content: doc.content.clone(),
                score: Self::cosine(&query_embedding, &doc.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Dependency bundle injected into builtin functions at agent creation
#[derive(Clone)]
pub struct FunctionDeps {
    /// LLM inference client
    pub inference: Arc<dyn InferenceClient>,
    /// Embedding provider for memory and retrieval
    pub embeddings: Arc<dyn EmbeddingProvider>,
    /// Document store for the retrieval functions
    pub documents: Arc<dyn DocumentStore>,
    /// Binary document parser
    pub parser: Arc<dyn DocumentParser>,
    /// Shared HTTP client for external API calls
    pub http: reqwest::Client,
    /// Config-defined functions resolvable by name, shared across agents
    pub custom_configs: Arc<DashMap<String, crate::config::FunctionConfig>>,
}

impl FunctionDeps {
    /// Builds the offline dependency set: hash embeddings, in-memory
    /// documents, and unconfigured inference/parsing.
    pub fn offline() -> Self {
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
        Self {
            inference: Arc::new(UnconfiguredInferenceClient),
            documents: Arc::new(InMemoryDocumentStore::new(Arc::clone(&embeddings))),
            embeddings,
            parser: Arc::new(UnconfiguredDocumentParser),
            http: reqwest::Client::new(),
            custom_configs: Arc::new(DashMap::new()),
        }
    }

    /// Replaces the inference client
    #[must_use]
    pub fn with_inference(mut self, inference: Arc<dyn InferenceClient>) -> Self {
        self.inference = inference;
        self
    }

    /// Makes a config-defined function resolvable by name
    pub fn register_function_config(&self, config: crate::config::FunctionConfig) {
        self.custom_configs.insert(config.name.clone(), config);
    }
}

impl Default for FunctionDeps {
    fn default() -> Self {
        Self::offline()
    }
}
