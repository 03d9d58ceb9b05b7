use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgencyError, Result};
use crate::schema::ParameterSchema;

/// Read-only view of the calling agent handed to every tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub agent: String,
    pub files_folder: Option<PathBuf>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Arguments accepted by `call`. Arguments are validated against this
    /// schema before the tool runs.
    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::any()
    }

    async fn call(&self, ctx: &ToolContext, input: Value) -> Result<Value>;
}

/// Static description of a tool that can be sent to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone)]
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: ParameterSchema,
}

/// Ordered set of tools attached to one agent. Names are unique.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.parameters();
        self.register_with_schema(tool, schema)
    }

    /// Register a tool with a schema that replaces the one the tool declares.
    pub fn register_with_schema(&mut self, tool: Arc<dyn Tool>, schema: ParameterSchema) -> Result<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(AgencyError::config("tool name must not be empty"));
        }
        if self.index.contains_key(&name) {
            return Err(AgencyError::config(format!(
                "tool `{name}` is registered more than once"
            )));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(RegisteredTool { tool, schema });
        Ok(())
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|entry| entry.tool.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&ParameterSchema> {
        self.index.get(name).map(|&i| &self.tools[i].schema)
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        self.tools
            .iter()
            .map(|entry| ToolDescription {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                parameters: entry.schema.to_json_schema(),
            })
            .collect()
    }

    pub async fn call(&self, ctx: &ToolContext, name: &str, input: Value) -> Result<Value> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| AgencyError::ToolNotFound(name.to_string()))?;

        entry.schema.validate(name, &input)?;

        entry.tool.call(ctx, input).await.map_err(|err| match err {
            err @ AgencyError::Validation { .. } => err,
            err @ AgencyError::ToolExecution { .. } => err,
            other => AgencyError::ToolExecution {
                name: name.to_string(),
                source: Box::new(other),
            },
        })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::schema::ValueKind;

    struct First;
    struct Second;

    #[async_trait]
    impl Tool for First {
        fn name(&self) -> &str {
            "first"
        }

        fn description(&self) -> &str {
            "First tool"
        }

        async fn call(&self, _ctx: &ToolContext, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    #[async_trait]
    impl Tool for Second {
        fn name(&self) -> &str {
            "second"
        }

        fn description(&self) -> &str {
            "Second tool"
        }

        async fn call(&self, _ctx: &ToolContext, _input: Value) -> Result<Value> {
            Err(AgencyError::Protocol("backend unavailable".into()))
        }
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn description(&self) -> &str {
            "Counts invocations"
        }

        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::strict().required("x", ValueKind::Integer, "")
        }

        async fn call(&self, _ctx: &ToolContext, _input: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    #[test]
    fn keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Second)).unwrap();
        registry.register(Arc::new(First)).unwrap();

        let names: Vec<String> = registry.describe().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(First)).unwrap();
        let err = registry.register(Arc::new(First)).unwrap_err();
        assert!(matches!(err, AgencyError::Configuration(_)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_tool() {
        let tool = Arc::new(Counting::default());
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone()).unwrap();
        let ctx = ToolContext::default();

        let err = registry
            .call(&ctx, "counting", json!({"x": "abc"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Validation { .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);

        registry.call(&ctx, "counting", json!({"x": 3})).await.unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wraps_tool_failures() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Second)).unwrap();
        let ctx = ToolContext::default();

        let err = registry.call(&ctx, "second", json!({})).await.unwrap_err();
        match err {
            AgencyError::ToolExecution { name, source } => {
                assert_eq!(name, "second");
                assert!(source.to_string().contains("backend unavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let missing = registry.call(&ctx, "ghost", json!({})).await.unwrap_err();
        assert!(matches!(missing, AgencyError::ToolNotFound(_)));
    }
}
