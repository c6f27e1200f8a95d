//! # Generation Capability
//!
//! Every model call in the loop goes through the [`Generator`] trait:
//! either a structured call that must return a value matching a JSON
//! schema, or a free-form text call.
//!
//! The Ollama adapter has no native structured-output mode, so it forces
//! a `submit` tool call whose parameters *are* the schema and captures the
//! tool arguments as the result. That trick lives entirely in
//! [`OllamaGenerator`]; callers only see `generate::<T>()`.

use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::{Prompt, ToolDefinition};
use rig::providers::ollama;
use rig::tool::Tool;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::research::state::estimate_tokens;

/// A named JSON schema describing the expected structured output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    /// Derive the schema for `T` with schemars.
    pub fn of<T: JsonSchema>(name: impl Into<String>) -> Result<Self, GenerationError> {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|e| GenerationError::Schema(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            schema,
        })
    }
}

/// Text-generation capability consumed by the planner, summarizer, judge
/// and report compiler.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a value conforming to `schema`.
    async fn generate_structured(
        &self,
        system: &str,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, GenerationError>;

    /// Generate free-form text.
    async fn generate_text(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;
}

/// Typed structured generation: derive the schema, call the generator,
/// deserialize the answer.
pub async fn generate<T>(
    generator: &dyn Generator,
    name: &str,
    system: &str,
    prompt: &str,
) -> Result<T, GenerationError>
where
    T: JsonSchema + DeserializeOwned,
{
    let schema = OutputSchema::of::<T>(name)?;
    let value = generator.generate_structured(system, prompt, &schema).await?;
    serde_json::from_value(value).map_err(|source| GenerationError::InvalidStructuredOutput {
        schema: name.to_string(),
        source,
    })
}

// =============================================================================
// TOKEN METERING
// =============================================================================

/// Wraps a generator and keeps an approximate running token count of
/// everything sent to and received from it.
pub struct MeteredGenerator {
    inner: Arc<dyn Generator>,
    tokens: AtomicUsize,
}

impl MeteredGenerator {
    pub fn new(inner: Arc<dyn Generator>) -> Self {
        Self {
            inner,
            tokens: AtomicUsize::new(0),
        }
    }

    pub fn tokens_used(&self) -> usize {
        self.tokens.load(Ordering::Relaxed)
    }

    fn add(&self, texts: &[&str]) {
        let n: usize = texts.iter().map(|t| estimate_tokens(t)).sum();
        self.tokens.fetch_add(n, Ordering::Relaxed);
    }
}

#[async_trait]
impl Generator for MeteredGenerator {
    async fn generate_structured(
        &self,
        system: &str,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, GenerationError> {
        self.add(&[system, prompt]);
        let value = self.inner.generate_structured(system, prompt, schema).await?;
        self.add(&[&value.to_string()]);
        Ok(value)
    }

    async fn generate_text(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        self.add(&[system, prompt]);
        let text = self.inner.generate_text(system, prompt).await?;
        self.add(&[&text]);
        Ok(text)
    }
}

// =============================================================================
// OLLAMA ADAPTER
// =============================================================================

/// Rig/Ollama-backed generator.
pub struct OllamaGenerator {
    client: ollama::Client,
    model: String,
    temperature: f64,
}

impl OllamaGenerator {
    /// Build a client against `host`.
    ///
    /// Rig's Ollama client reads its base URL from `OLLAMA_API_BASE_URL`,
    /// so this must run once at startup, before any run is started.
    pub fn new(host: &str, model: impl Into<String>, temperature: f32) -> Self {
        std::env::set_var("OLLAMA_API_BASE_URL", host);
        Self {
            client: ollama::Client::from_env(),
            model: model.into(),
            temperature: f64::from(temperature),
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate_structured(
        &self,
        system: &str,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, GenerationError> {
        let submit = SubmitTool::new(schema.clone());
        let slot = submit.slot();

        let preamble = format!(
            "{system}\n\nYou MUST respond by calling the `{}` tool exactly once with \
             arguments matching its schema. Do not answer in plain text.",
            SubmitTool::NAME
        );

        let agent = self
            .client
            .agent(&self.model)
            .preamble(&preamble)
            .temperature(self.temperature)
            .tool(submit)
            .build();

        let reply = agent.prompt(prompt).multi_turn(1).await;

        if let Some(args) = take_slot(&slot) {
            debug!(schema = %schema.name, "Captured structured output from submit tool");
            return Ok(args);
        }

        // Some models ignore the tool and answer with JSON text instead.
        match reply {
            Ok(text) => extract_json(&text).ok_or_else(|| {
                warn!(schema = %schema.name, "Model answered without calling submit");
                GenerationError::MissingStructuredOutput(schema.name.clone())
            }),
            Err(e) => Err(GenerationError::Completion(e.to_string())),
        }
    }

    async fn generate_text(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(system)
            .temperature(self.temperature)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| GenerationError::Completion(e.to_string()))
    }
}

type Slot = Arc<Mutex<Option<Value>>>;

fn take_slot(slot: &Slot) -> Option<Value> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

#[derive(Debug, Error)]
#[error("submit tool failed: {0}")]
pub struct SubmitError(String);

/// The forced tool: its parameters are the output schema, and calling it
/// stores the arguments for the adapter to pick up.
struct SubmitTool {
    schema: OutputSchema,
    slot: Slot,
}

impl SubmitTool {
    fn new(schema: OutputSchema) -> Self {
        Self {
            schema,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn slot(&self) -> Slot {
        self.slot.clone()
    }
}

impl Tool for SubmitTool {
    const NAME: &'static str = "submit";

    type Args = Value;
    type Output = String;
    type Error = SubmitError;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        let mut parameters = self.schema.schema.clone();
        if let Some(obj) = parameters.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
        }
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: format!("Submit the final `{}` answer.", self.schema.name),
            parameters,
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|_| SubmitError("result slot poisoned".to_string()))?;
        // First submission wins.
        if guard.is_none() {
            *guard = Some(args);
        }
        Ok("Submitted.".to_string())
    }
}

/// Pull a JSON object out of model text, tolerating markdown fences and
/// leading/trailing prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    let unfenced = trimmed
        .split("```")
        .nth(1)
        .map(|block| block.trim_start_matches("json").trim());
    if let Some(block) = unfenced {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(block) {
            return Some(v);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}
