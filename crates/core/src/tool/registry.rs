use std::collections::HashMap;

use toolchat_model::ModelTool;

use super::{Tool, ToolDefinition};

/// A set of tools indexed by name.
///
/// Names are unique: registering a tool under a name that is already taken
/// replaces the previous definition entirely.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    tools: HashMap<String, ToolDefinition>,
}

impl Registry {
    /// Registers a tool, returning the definition it replaced if any.
    #[inline]
    pub fn register<T: Tool>(&mut self, tool: T) -> Option<ToolDefinition> {
        self.register_definition(ToolDefinition::new(tool))
    }

    /// Registers an already wrapped tool, returning the definition it
    /// replaced if any.
    pub fn register_definition(
        &mut self,
        definition: ToolDefinition,
    ) -> Option<ToolDefinition> {
        let name = definition.name().to_owned();
        let replaced = self.tools.insert(name, definition);
        if let Some(replaced) = &replaced {
            debug!("tool `{}` has been replaced", replaced.name());
        }
        replaced
    }

    /// Looks up a tool by name.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Returns the schemas of all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ModelTool> {
        let mut schemas: Vec<_> =
            self.tools.values().map(ToolDefinition::schema).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde_json::{Value, json};

    use super::*;
    use crate::tool::ToolResult;

    struct EchoTool {
        description: &'static str,
        reply: &'static str,
        schema: Value,
    }

    impl EchoTool {
        fn new(description: &'static str, reply: &'static str) -> Self {
            Self {
                description,
                reply,
                schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } }
                }),
            }
        }
    }

    impl Tool for EchoTool {
        type Input = Value;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            self.description
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(self.reply.to_owned()))
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut registry = Registry::default();
        assert!(registry.register(EchoTool::new("Echoes", "first")).is_none());

        let tool = registry.lookup("echo").unwrap().clone();
        assert_eq!(tool.name(), "echo");
        assert_eq!(tool.description(), "Echoes");
        assert_eq!(tool.parameter_schema()["type"], "object");
        assert_eq!(tool.execute(json!({})).await.unwrap(), "first");
        assert!(registry.lookup("missing").is_none());

        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0], tool.schema());
    }

    #[tokio::test]
    async fn test_replace_by_name() {
        let mut registry = Registry::default();
        registry.register(EchoTool::new("Old", "old"));
        let old = registry.lookup("echo").unwrap().clone();

        let replaced = registry.register(EchoTool::new("New", "new")).unwrap();
        assert!(replaced.ptr_eq(&old));
        assert_eq!(registry.len(), 1);

        let current = registry.lookup("echo").unwrap();
        assert!(!current.ptr_eq(&old));
        assert_eq!(current.description(), "New");
        assert_eq!(current.execute(json!({})).await.unwrap(), "new");
    }

    #[test]
    fn test_schemas_sorted() {
        struct Named(&'static str, Value);

        impl Tool for Named {
            type Input = Value;

            fn name(&self) -> &str {
                self.0
            }

            fn description(&self) -> &str {
                ""
            }

            fn parameter_schema(&self) -> &Value {
                &self.1
            }

            fn execute(
                &self,
                _input: Self::Input,
            ) -> impl Future<Output = ToolResult> + Send + 'static {
                ready(Ok(String::new()))
            }
        }

        let mut registry = Registry::default();
        for name in ["search_web", "get_weather", "convert_currency"] {
            registry.register(Named(name, Value::Null));
        }
        let names: Vec<_> =
            registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["convert_currency", "get_weather", "search_web"]);
    }
}
