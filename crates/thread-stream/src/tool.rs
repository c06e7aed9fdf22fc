use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{AdapterError, ToolError};

/// Tool description sent to the model.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool arguments.
    pub parameters: Value,
}

impl ToolDeclaration {
    /// Creates a declaration that accepts any JSON object.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

/// Executes one tool call.
///
/// Implementations should observe `cancel` and return `ToolError::Cancelled`
/// promptly once it fires.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: Value, cancel: CancellationToken) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a `ToolExecutor`.
pub struct FnTool<F> {
    f: F,
}

impl<F> FnTool<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F, Fut> ToolExecutor for FnTool<F>
where
    F: Fn(Value, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn execute(&self, args: Value, cancel: CancellationToken) -> Result<Value, ToolError> {
        (self.f)(args, cancel).await
    }
}

/// A tool call being assembled from streamed argument deltas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument text accumulated from deltas.
    pub args_text: String,
    /// Set once the completion event for this id was observed.
    pub complete: bool,
}

impl ToolCall {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Appends an argument delta. The first non-empty name wins.
    pub fn push_delta(&mut self, name: &str, args_delta: &str) {
        if self.name.is_empty() && !name.is_empty() {
            self.name = name.to_string();
        }
        self.args_text.push_str(args_delta);
    }

    /// Decodes the accumulated arguments. Empty text decodes to `{}`.
    pub fn arguments(&self) -> Result<Value, serde_json::Error> {
        if self.args_text.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.args_text)
    }
}

struct RegisteredTool {
    declaration: ToolDeclaration,
    executor: Option<Arc<dyn ToolExecutor>>,
}

/// Caller-owned set of tools available to a run.
///
/// Tools declared without an executor are sent to the model but left for the
/// caller to answer; their completions pass through the pipeline unresolved.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<Vec<RegisteredTool>>,
    index: Arc<HashMap<String, usize>>,
    execution_timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Returns the executor registered for `name`, if any.
    pub fn executor(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.index
            .get(name)
            .and_then(|&i| self.tools[i].executor.clone())
    }

    /// Declarations in registration order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|t| t.declaration.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    /// Runs `executor`, applying the registry's execution timeout.
    pub(crate) async fn run(
        &self,
        executor: Arc<dyn ToolExecutor>,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ToolError> {
        match self.execution_timeout {
            Some(limit) => tokio::time::timeout(limit, executor.execute(args, cancel))
                .await
                .unwrap_or(Err(ToolError::Timeout(limit))),
            None => executor.execute(args, cancel).await,
        }
    }
}

/// Builder used to assemble a `ToolRegistry`.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
    execution_timeout: Option<Duration>,
}

impl ToolRegistryBuilder {
    /// Registers a tool executed by the pipeline.
    pub fn tool(mut self, declaration: ToolDeclaration, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tools.push(RegisteredTool {
            declaration,
            executor: Some(executor),
        });
        self
    }

    /// Registers a tool from an async closure.
    pub fn tool_fn<F, Fut>(self, declaration: ToolDeclaration, f: F) -> Self
    where
        F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.tool(declaration, Arc::new(FnTool::new(f)))
    }

    /// Declares a tool the caller answers itself.
    pub fn declaration(mut self, declaration: ToolDeclaration) -> Self {
        self.tools.push(RegisteredTool {
            declaration,
            executor: None,
        });
        self
    }

    /// Limits how long a single executor invocation may run.
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Builds the registry and validates tool names (including duplicates).
    pub fn build(self) -> Result<ToolRegistry, AdapterError> {
        let mut index = HashMap::with_capacity(self.tools.len());
        for (i, tool) in self.tools.iter().enumerate() {
            let name = tool.declaration.name.trim();
            if name.is_empty() {
                return Err(AdapterError::Config("tool name must not be empty".into()));
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(AdapterError::Config(format!(
                    "duplicate tool registration: {name}"
                )));
            }
        }
        Ok(ToolRegistry {
            tools: Arc::new(self.tools),
            index: Arc::new(index),
            execution_timeout: self.execution_timeout,
        })
    }
}
