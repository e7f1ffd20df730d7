use std::sync::Arc;
use std::time::Duration;

use toolchat_model::ModelProvider;

use super::{DEFAULT_MAX_ROUNDS, Limits, Orchestrator, Stage, StageCallback};
use crate::adapter::{DEFAULT_SYSTEM_PROMPT, MessageAdapter};
use crate::model_client::ModelClient;
use crate::tool::{Registry, Tool, ToolDefinition};

/// [`Orchestrator`] builder.
pub struct OrchestratorBuilder {
    model_client: ModelClient,
    registry: Registry,
    system_prompt: String,
    metadata_fields: Vec<(String, String)>,
    limits: Limits,
    on_delta: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    on_stage: Option<StageCallback>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            registry: Registry::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            metadata_fields: vec![],
            limits: Limits {
                max_rounds: DEFAULT_MAX_ROUNDS,
                max_duration: None,
            },
            on_delta: None,
            on_stage: None,
        }
    }

    /// Sets the persona prompt sent as the first message of every request.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Adds a static field to the metadata injected into user messages.
    #[inline]
    pub fn with_metadata_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata_fields.push((key.into(), value.into()));
        self
    }

    /// Registers a tool. A tool with the same name replaces the previous one.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.registry.register(tool);
        self
    }

    /// Registers an already wrapped tool.
    #[inline]
    pub fn with_tool_definition(mut self, definition: ToolDefinition) -> Self {
        self.registry.register_definition(definition);
        self
    }

    /// Limits the number of tool rounds per turn.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.limits.max_rounds = max_rounds;
        self
    }

    /// Limits the wall-clock time of each turn.
    #[inline]
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.limits.max_duration = Some(max_duration);
        self
    }

    /// Attaches a callback to be invoked with every streamed text delta.
    #[inline]
    pub fn on_delta(
        mut self,
        on_delta: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_delta = Some(Arc::new(on_delta));
        self
    }

    /// Attaches a callback to be invoked whenever a turn changes stage.
    #[inline]
    pub fn on_stage(
        mut self,
        on_stage: impl Fn(Stage) + Send + Sync + 'static,
    ) -> Self {
        self.on_stage = Some(Box::new(on_stage));
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> Orchestrator {
        let OrchestratorBuilder {
            model_client,
            registry,
            system_prompt,
            metadata_fields,
            limits,
            on_delta,
            on_stage,
        } = self;

        let adapter = metadata_fields.into_iter().fold(
            MessageAdapter::new(system_prompt),
            |adapter, (key, value)| adapter.with_metadata_field(key, value),
        );
        debug!(
            "built an orchestrator with {} tools, max {} rounds",
            registry.len(),
            limits.max_rounds
        );
        Orchestrator {
            model_client,
            registry,
            adapter,
            limits,
            on_delta,
            on_stage,
        }
    }
}
