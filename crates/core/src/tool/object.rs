use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use toolchat_model::ModelTool;

use super::{Error, Tool, ToolResult};

type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

trait ToolObject: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameter_schema(&self) -> &Value;

    fn execute(&self, arguments: Value) -> BoxedToolFuture;
}

struct ToolObjectImpl<T: Tool>(T);

impl<T: Tool> ToolObject for ToolObjectImpl<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn execute(&self, arguments: Value) -> BoxedToolFuture {
        let input: T::Input = match serde_json::from_value(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolResult::Err(
                    Error::invalid_input().with_reason(reason),
                )));
            }
        };
        Box::pin(self.0.execute(input))
    }
}

/// A registered tool with its type erased.
///
/// Cloning is cheap, and clones refer to the same tool instance.
#[derive(Clone)]
pub struct ToolDefinition(Arc<dyn ToolObject>);

impl ToolDefinition {
    /// Wraps a tool.
    #[inline]
    pub fn new<T: Tool>(tool: T) -> Self {
        Self(Arc::new(ToolObjectImpl(tool)))
    }

    /// Returns the name of the tool.
    #[inline]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Returns the description of the tool.
    #[inline]
    pub fn description(&self) -> &str {
        self.0.description()
    }

    /// Returns the parameter schema of the tool.
    #[inline]
    pub fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    /// Returns the part of the definition that is advertised to the model.
    pub fn schema(&self) -> ModelTool {
        ModelTool {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameter_schema().clone(),
        }
    }

    /// Executes the tool with structured arguments.
    ///
    /// Arguments that don't match the tool's input type fail with
    /// [`super::ErrorKind::InvalidInput`] without running the tool.
    #[inline]
    pub fn execute(&self, arguments: Value) -> BoxedToolFuture {
        self.0.execute(arguments)
    }

    /// Returns `true` if both definitions refer to the same tool instance.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
