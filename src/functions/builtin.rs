//! Builtin function family
//!
//! The functions every agent can register by name from its configuration:
//! arithmetic and echo, text and data analysis, LLM inference, external HTTP
//! calls, document parsing, and retrieval. External concerns are reached
//! through the injected [`FunctionDeps`] providers; none of these hold
//! singleton state.

use crate::config::FunctionConfig;
use crate::data::{AgentData, FunctionResult};
use crate::functions::providers::{
    DocumentParser, DocumentStore, EmbeddingProvider, FunctionDeps, InferenceClient,
};
use crate::functions::{
    AgentFunction, ExecutionContext, FunctionRegistry, FunctionSchema, ParameterType,
};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::warn;

/// Adds two numbers
pub struct AddFunction;

#[async_trait]
impl AgentFunction for AddFunction {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers"
    }

    fn category(&self) -> &str {
        "arithmetic"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("x", ParameterType::Float)
            .required("y", ParameterType::Float)
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let x = params.get_float("x").unwrap_or_default();
        let y = params.get_float("y").unwrap_or_default();
        FunctionResult::ok(AgentData::new().with("sum", x + y))
    }
}

/// Echoes a message, optionally transformed
pub struct EchoFunction;

#[async_trait]
impl AgentFunction for EchoFunction {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo a message with optional processing"
    }

    fn category(&self) -> &str {
        "utility"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("text", ParameterType::String)
            .optional("uppercase", ParameterType::Bool, Some(false.into()))
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let text = params.get_string("text").unwrap_or_default();
        let text = if params.get_bool("uppercase").unwrap_or(false) {
            text.to_uppercase()
        } else {
            text.to_string()
        };
        FunctionResult::ok(AgentData::new().with("text", text))
    }
}

/// Waits for a requested number of milliseconds, honoring cancellation
pub struct DelayFunction;

#[async_trait]
impl AgentFunction for DelayFunction {
    fn name(&self) -> &str {
        "delay"
    }

    fn description(&self) -> &str {
        "Wait for the specified number of milliseconds"
    }

    fn category(&self) -> &str {
        "utility"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("duration_ms", ParameterType::Int)
    }

    async fn execute(&self, params: AgentData, ctx: &ExecutionContext) -> FunctionResult {
        let requested = params.get_int("duration_ms").unwrap_or_default();
        let duration = Duration::from_millis(u64::try_from(requested.max(0)).unwrap_or(0));

        tokio::select! {
            () = tokio::time::sleep(duration) => {
                FunctionResult::ok(AgentData::new().with("slept_ms", requested.max(0)))
            }
            () = ctx.cancellation.cancelled() => {
                FunctionResult::error("delay cancelled before completion")
            }
        }
    }
}

/// Counts words, characters, and sentences, with a naive sentiment estimate
pub struct TextAnalysisFunction;

impl TextAnalysisFunction {
    const POSITIVE: &'static [&'static str] =
        &["good", "great", "excellent", "happy", "love", "success", "win"];
    const NEGATIVE: &'static [&'static str] =
        &["bad", "terrible", "awful", "sad", "hate", "failure", "lose"];
}

#[async_trait]
impl AgentFunction for TextAnalysisFunction {
    fn name(&self) -> &str {
        "text_analysis"
    }

    fn description(&self) -> &str {
        "Analyze text for word count, character count, and sentiment"
    }

    fn category(&self) -> &str {
        "text"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("text", ParameterType::String)
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let text = params.get_string("text").unwrap_or_default();
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();

        let positive = words
            .iter()
            .filter(|w| Self::POSITIVE.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())))
            .count();
        let negative = words
            .iter()
            .filter(|w| Self::NEGATIVE.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())))
            .count();
        let sentiment = match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => "positive",
            std::cmp::Ordering::Less => "negative",
            std::cmp::Ordering::Equal => "neutral",
        };

        let sentences = text
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count();

        FunctionResult::ok(
            AgentData::new()
                .with("word_count", i64::try_from(words.len()).unwrap_or(i64::MAX))
                .with("char_count", i64::try_from(text.chars().count()).unwrap_or(i64::MAX))
                .with("sentence_count", i64::try_from(sentences).unwrap_or(i64::MAX))
                .with("sentiment", sentiment),
        )
    }
}

/// Transforms string arrays with a named operation
pub struct DataTransformFunction;

#[async_trait]
impl AgentFunction for DataTransformFunction {
    fn name(&self) -> &str {
        "data_transform"
    }

    fn description(&self) -> &str {
        "Transform string arrays with sort, reverse, dedup, or case operations"
    }

    fn category(&self) -> &str {
        "data"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("items", ParameterType::Array)
            .optional("operation", ParameterType::String, Some("sort".into()))
            .one_of(&["sort", "reverse", "dedup", "uppercase", "lowercase"])
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let mut items: Vec<String> = params.get_array("items").unwrap_or_default().to_vec();

        match params.get_string("operation").unwrap_or("sort") {
            "sort" => items.sort(),
            "reverse" => items.reverse(),
            "dedup" => {
                let mut seen = std::collections::HashSet::new();
                items.retain(|item| seen.insert(item.clone()));
            }
            "uppercase" => items.iter_mut().for_each(|i| *i = i.to_uppercase()),
            "lowercase" => items.iter_mut().for_each(|i| *i = i.to_lowercase()),
            // unreachable: the enum constraint was validated before dispatch
            other => return FunctionResult::error(format!("unsupported operation '{other}'")),
        }

        FunctionResult::ok(
            AgentData::new()
                .with("count", i64::try_from(items.len()).unwrap_or(i64::MAX))
                .with("items", items),
        )
    }
}

/// Computes summary statistics over an array of numeric strings
pub struct DataAnalysisFunction;

#[async_trait]
impl AgentFunction for DataAnalysisFunction {
    fn name(&self) -> &str {
        "data_analysis"
    }

    fn description(&self) -> &str {
        "Analyze numeric data and extract summary statistics"
    }

    fn category(&self) -> &str {
        "data"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("values", ParameterType::Array)
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let values: Vec<f64> = params
            .get_array("values")
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.trim().parse().ok())
            .collect();

        if values.is_empty() {
            return FunctionResult::error("parameter 'values' contains no numeric entries");
        }

        let sum: f64 = values.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        FunctionResult::ok(
            AgentData::new()
                .with("count", i64::try_from(values.len()).unwrap_or(i64::MAX))
                .with("sum", sum)
                .with("mean", mean)
                .with("min", min)
                .with("max", max),
        )
    }
}

/// Runs a completion against the configured inference backend
pub struct InferenceFunction {
    client: Arc<dyn InferenceClient>,
}

impl InferenceFunction {
    /// Creates the function with the injected backend client
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentFunction for InferenceFunction {
    fn name(&self) -> &str {
        "inference"
    }

    fn description(&self) -> &str {
        "Run inference using the configured backend"
    }

    fn category(&self) -> &str {
        "inference"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("prompt", ParameterType::String)
            .optional("system_prompt", ParameterType::String, None)
            .optional("max_tokens", ParameterType::Int, None)
            .optional("temperature", ParameterType::Float, None)
    }

    fn estimate_cost(&self, _params: &AgentData) -> f64 {
        10.0
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let prompt = params.get_string("prompt").unwrap_or_default();
        match self
            .client
            .complete(prompt, params.get_string("system_prompt"), &params)
            .await
        {
            Ok(response) => FunctionResult::ok(AgentData::new().with("response", response)),
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Config-defined function that wraps a system prompt around the backend
pub struct LlmFunction {
    name: String,
    description: String,
    system_prompt: String,
    extra_parameters: Vec<crate::functions::ParameterSpec>,
    client: Arc<dyn InferenceClient>,
}

impl LlmFunction {
    /// Creates a named LLM function from its configuration
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        client: Arc<dyn InferenceClient>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            extra_parameters: Vec::new(),
            client,
        }
    }

    /// Appends config-declared parameters to the schema
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<crate::functions::ParameterSpec>) -> Self {
        self.extra_parameters = parameters;
        self
    }
}

#[async_trait]
impl AgentFunction for LlmFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> &str {
        "llm"
    }

    fn schema(&self) -> FunctionSchema {
        let mut schema = FunctionSchema::new(self.name(), self.description(), self.category())
            .required("prompt", ParameterType::String)
            .optional("max_tokens", ParameterType::Int, None)
            .optional("temperature", ParameterType::Float, None);
        schema.parameters.extend(self.extra_parameters.iter().cloned());
        schema
    }

    fn estimate_cost(&self, _params: &AgentData) -> f64 {
        10.0
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let prompt = params.get_string("prompt").unwrap_or_default();
        match self
            .client
            .complete(prompt, Some(&self.system_prompt), &params)
            .await
        {
            Ok(response) => FunctionResult::ok(AgentData::new().with("response", response)),
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Config-defined function that calls an external HTTP endpoint
pub struct ExternalApiFunction {
    name: String,
    description: String,
    endpoint: String,
    http: reqwest::Client,
}

impl ExternalApiFunction {
    /// Creates a named external API function from its configuration
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            endpoint: endpoint.into(),
            http,
        }
    }
}

#[async_trait]
impl AgentFunction for ExternalApiFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> &str {
        "external_api"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .optional("method", ParameterType::String, Some("GET".into()))
            .one_of(&["GET", "POST"])
            .optional("path", ParameterType::String, None)
            .optional("body", ParameterType::Object, None)
    }

    fn estimate_cost(&self, _params: &AgentData) -> f64 {
        5.0
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let mut url = self.endpoint.clone();
        if let Some(path) = params.get_string("path") {
            url = format!("{}/{}", url.trim_end_matches('/'), path.trim_start_matches('/'));
        }

        let request = match params.get_string("method").unwrap_or("GET") {
            "POST" => {
                let body = params.get_object("body").cloned().unwrap_or_default();
                self.http.post(&url).json(&body)
            }
            _ => self.http.get(&url),
        };

        match request.send().await {
            Ok(response) => {
                let status = i64::from(response.status().as_u16());
                match response.text().await {
                    Ok(body) => FunctionResult::ok(
                        AgentData::new().with("status", status).with("body", body),
                    ),
                    Err(e) => FunctionResult::error(format!(
                        "external API '{url}' body read failed: {e}"
                    )),
                }
            }
            Err(e) => FunctionResult::error(format!("external API '{url}' request failed: {e}")),
        }
    }
}

/// Searches the document store for relevant documents
pub struct RetrievalFunction {
    store: Arc<dyn DocumentStore>,
}

impl RetrievalFunction {
    /// Creates the function over the injected store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentFunction for RetrievalFunction {
    fn name(&self) -> &str {
        "retrieval"
    }

    fn description(&self) -> &str {
        "Search and retrieve relevant documents from the knowledge base"
    }

    fn category(&self) -> &str {
        "retrieval"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("query", ParameterType::String)
            .optional("limit", ParameterType::Int, Some(5.into()))
            .optional("collection", ParameterType::String, Some("documents".into()))
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let query = params.get_string("query").unwrap_or_default();
        let limit = usize::try_from(params.get_int("limit").unwrap_or(5).max(0)).unwrap_or(5);
        let collection = params.get_string("collection").unwrap_or("documents");

        match self.store.retrieve(collection, query, limit).await {
            Ok(documents) => {
                let contents: Vec<String> =
                    documents.iter().map(|d| d.content.clone()).collect();
                FunctionResult::ok(
                    AgentData::new()
                        .with("count", i64::try_from(contents.len()).unwrap_or(i64::MAX))
                        .with("documents", contents),
                )
            }
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Retrieves documents and formats them as prompt-ready context
pub struct ContextRetrievalFunction {
    store: Arc<dyn DocumentStore>,
}

impl ContextRetrievalFunction {
    /// Creates the function over the injected store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentFunction for ContextRetrievalFunction {
    fn name(&self) -> &str {
        "context_retrieval"
    }

    fn description(&self) -> &str {
        "Retrieve and format documents as context for enhanced responses"
    }

    fn category(&self) -> &str {
        "retrieval"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("query", ParameterType::String)
            .optional("limit", ParameterType::Int, Some(3.into()))
            .optional("collection", ParameterType::String, Some("documents".into()))
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let query = params.get_string("query").unwrap_or_default();
        let limit = usize::try_from(params.get_int("limit").unwrap_or(3).max(0)).unwrap_or(3);
        let collection = params.get_string("collection").unwrap_or("documents");

        match self.store.retrieve(collection, query, limit).await {
            Ok(documents) => {
                let mut context = String::from("Relevant context:\n");
                for doc in &documents {
                    context.push_str("- ");
                    context.push_str(&doc.content);
                    context.push('\n');
                }
                FunctionResult::ok(
                    AgentData::new()
                        .with("context", context)
                        .with("count", i64::try_from(documents.len()).unwrap_or(i64::MAX)),
                )
            }
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Adds a document to the knowledge base
pub struct AddDocumentFunction {
    store: Arc<dyn DocumentStore>,
}

impl AddDocumentFunction {
    /// Creates the function over the injected store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentFunction for AddDocumentFunction {
    fn name(&self) -> &str {
        "add_document"
    }

    fn description(&self) -> &str {
        "Add a document to the knowledge base for future retrieval"
    }

    fn category(&self) -> &str {
        "document_management"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("content", ParameterType::String)
            .optional("id", ParameterType::String, None)
            .optional("collection", ParameterType::String, Some("documents".into()))
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let content = params.get_string("content").unwrap_or_default();
        let id = params.get_string("id").map(ToString::to_string);
        let collection = params.get_string("collection").unwrap_or("documents");

        match self.store.add_document(collection, id, content).await {
            Ok(id) => FunctionResult::ok(AgentData::new().with("id", id)),
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Removes a document from the knowledge base
pub struct RemoveDocumentFunction {
    store: Arc<dyn DocumentStore>,
}

impl RemoveDocumentFunction {
    /// Creates the function over the injected store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentFunction for RemoveDocumentFunction {
    fn name(&self) -> &str {
        "remove_document"
    }

    fn description(&self) -> &str {
        "Remove a document from the knowledge base by ID"
    }

    fn category(&self) -> &str {
        "document_management"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("id", ParameterType::String)
            .optional("collection", ParameterType::String, Some("documents".into()))
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let id = params.get_string("id").unwrap_or_default();
        let collection = params.get_string("collection").unwrap_or("documents");

        match self.store.remove_document(collection, id).await {
            Ok(removed) => FunctionResult::ok(AgentData::new().with("removed", removed)),
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Extracts text from a PDF file via the injected parser
pub struct ParsePdfFunction {
    parser: Arc<dyn DocumentParser>,
}

impl ParsePdfFunction {
    /// Creates the function over the injected parser
    pub fn new(parser: Arc<dyn DocumentParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl AgentFunction for ParsePdfFunction {
    fn name(&self) -> &str {
        "parse_pdf"
    }

    fn description(&self) -> &str {
        "Parse a PDF file to extract text content"
    }

    fn category(&self) -> &str {
        "document_processing"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("path", ParameterType::String)
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let path = params.get_string("path").unwrap_or_default();
        match self.parser.parse_pdf(path).await {
            Ok(text) => FunctionResult::ok(AgentData::new().with("text", text)),
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Extracts text from a DOCX file via the injected parser
pub struct ParseDocxFunction {
    parser: Arc<dyn DocumentParser>,
}

impl ParseDocxFunction {
    /// Creates the function over the injected parser
    pub fn new(parser: Arc<dyn DocumentParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl AgentFunction for ParseDocxFunction {
    fn name(&self) -> &str {
        "parse_docx"
    }

    fn description(&self) -> &str {
        "Parse a DOCX file to extract text content"
    }

    fn category(&self) -> &str {
        "document_processing"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("path", ParameterType::String)
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let path = params.get_string("path").unwrap_or_default();
        match self.parser.parse_docx(path).await {
            Ok(text) => FunctionResult::ok(AgentData::new().with("text", text)),
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Generates an embedding vector for text
pub struct GetEmbeddingFunction {
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl GetEmbeddingFunction {
    /// Creates the function over the injected provider
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embeddings }
    }
}

#[async_trait]
impl AgentFunction for GetEmbeddingFunction {
    fn name(&self) -> &str {
        "get_embedding"
    }

    fn description(&self) -> &str {
        "Generate an embedding vector for text content"
    }

    fn category(&self) -> &str {
        "embedding"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
            .required("text", ParameterType::String)
    }

    async fn execute(&self, params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let text = params.get_string("text").unwrap_or_default();
        match self.embeddings.embed(text).await {
            Ok(vector) => {
                let values: Vec<String> = vector.iter().map(ToString::to_string).collect();
                FunctionResult::ok(
                    AgentData::new()
                        .with("dimension", i64::try_from(vector.len()).unwrap_or(i64::MAX))
                        .with("values", values),
                )
            }
            Err(e) => FunctionResult::error(e.to_string()),
        }
    }
}

/// Lists the functions registered alongside this one
///
/// Holds a weak reference back to the owning registry to avoid a
/// reference cycle through the registered function table.
pub struct ListToolsFunction {
    registry: Weak<FunctionRegistry>,
}

impl ListToolsFunction {
    /// Creates the function over a weak registry handle
    pub fn new(registry: Weak<FunctionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl AgentFunction for ListToolsFunction {
    fn name(&self) -> &str {
        "list_tools"
    }

    fn description(&self) -> &str {
        "List all available functions and their descriptions"
    }

    fn category(&self) -> &str {
        "system"
    }

    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(self.name(), self.description(), self.category())
    }

    async fn execute(&self, _params: AgentData, _ctx: &ExecutionContext) -> FunctionResult {
        let Some(registry) = self.registry.upgrade() else {
            return FunctionResult::error("function registry is no longer available");
        };

        let tools: Vec<String> = registry
            .schemas()
            .iter()
            .map(|schema| format!("{}: {}", schema.name, schema.description))
            .collect();
        FunctionResult::ok(
            AgentData::new()
                .with("count", i64::try_from(tools.len()).unwrap_or(i64::MAX))
                .with("tools", tools),
        )
    }
}

/// Creates a builtin function by name, or `None` for unknown names
///
/// `list_tools` is excluded here because it needs a handle to the registry;
/// use [`register_builtins`] to wire a complete set.
pub fn builtin_function(name: &str, deps: &FunctionDeps) -> Option<Arc<dyn AgentFunction>> {
    match name {
        "add" => Some(Arc::new(AddFunction)),
        "echo" => Some(Arc::new(EchoFunction)),
        "delay" => Some(Arc::new(DelayFunction)),
        // text_processing is a config-file alias kept from older deployments
        "text_analysis" | "text_processing" => Some(Arc::new(TextAnalysisFunction)),
        "data_transform" => Some(Arc::new(DataTransformFunction)),
        "data_analysis" => Some(Arc::new(DataAnalysisFunction)),
        "inference" => Some(Arc::new(InferenceFunction::new(Arc::clone(&deps.inference)))),
        "retrieval" => Some(Arc::new(RetrievalFunction::new(Arc::clone(&deps.documents)))),
        "context_retrieval" => Some(Arc::new(ContextRetrievalFunction::new(Arc::clone(
            &deps.documents,
        )))),
        "add_document" => Some(Arc::new(AddDocumentFunction::new(Arc::clone(&deps.documents)))),
        "remove_document" => Some(Arc::new(RemoveDocumentFunction::new(Arc::clone(
            &deps.documents,
        )))),
        "parse_pdf" => Some(Arc::new(ParsePdfFunction::new(Arc::clone(&deps.parser)))),
        "parse_docx" => Some(Arc::new(ParseDocxFunction::new(Arc::clone(&deps.parser)))),
        "get_embedding" => Some(Arc::new(GetEmbeddingFunction::new(Arc::clone(
            &deps.embeddings,
        )))),
        _ => None,
    }
}

/// Creates a function from a declarative [`FunctionConfig`]
///
/// `llm` and `external_api` types require configuration beyond a name;
/// any other type falls back to the builtin table.
pub fn function_from_config(
    config: &FunctionConfig,
    deps: &FunctionDeps,
) -> Option<Arc<dyn AgentFunction>> {
    match config.function_type.as_str() {
        "llm" => Some(Arc::new(
            LlmFunction::new(
                config.name.clone(),
                config.description.clone(),
                config.system_prompt.clone().unwrap_or_default(),
                Arc::clone(&deps.inference),
            )
            .with_parameters(config.parameters.clone()),
        )),
        "external_api" => {
            let endpoint = config.endpoint.clone()?;
            Some(Arc::new(ExternalApiFunction::new(
                config.name.clone(),
                config.description.clone(),
                endpoint,
                deps.http.clone(),
            )))
        }
        _ => builtin_function(&config.name, deps),
    }
}

/// Registers the named functions plus `list_tools` into `registry`
///
/// Each name resolves against the config-defined functions first, then the
/// builtin table. Unknown names are skipped with a warning so one bad entry
/// in an agent's function list does not abort agent creation.
pub fn register_builtins(registry: &Arc<FunctionRegistry>, names: &[String], deps: &FunctionDeps) {
    for name in names {
        let custom = deps
            .custom_configs
            .get(name)
            .and_then(|config| function_from_config(&config, deps));
        match custom.or_else(|| builtin_function(name, deps)) {
            Some(function) => registry.register(function),
            None if name == "list_tools" => {}
            None => warn!(function = %name, "skipping unknown function in agent configuration"),
        }
    }
    registry.register(Arc::new(ListToolsFunction::new(Arc::downgrade(registry))));
}
