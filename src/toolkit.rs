use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::{AgencyError, Result};
use crate::schema::{ParameterSchema, ValueKind};
use crate::tool::{Tool, ToolContext};

/// Name-to-implementation map the agency resolves tool names against.
#[derive(Default, Clone)]
pub struct ToolCatalog {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every tool that ships with the crate.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(Arc::new(EchoTool));
        catalog.insert(Arc::new(ReadFileTool));
        catalog.insert(Arc::new(ListFilesTool));
        catalog.insert(Arc::new(AddTool));
        catalog
    }

    /// Add a tool, replacing any earlier entry with the same name.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name).ok_or_else(|| {
            AgencyError::config(format!(
                "unknown tool `{name}` (available: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the provided text back to the caller."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::strict().required("text", ValueKind::String, "Text to echo back")
    }

    async fn call(&self, _ctx: &ToolContext, input: Value) -> Result<Value> {
        Ok(json!({ "echo": input["text"] }))
    }
}

struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 file from the agent's files folder."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::strict().required(
            "path",
            ValueKind::String,
            "Path relative to the agent's files folder",
        )
    }

    async fn call(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let relative = input["path"].as_str().unwrap_or_default();
        let path = resolve_in_folder(self.name(), ctx, relative)?;

        let contents = fs::read_to_string(&path)
            .await
            .map_err(|err| AgencyError::ToolExecution {
                name: self.name().into(),
                source: Box::new(err),
            })?;

        Ok(json!({ "path": relative, "contents": contents }))
    }
}

struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files attached to the agent."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::strict()
    }

    async fn call(&self, ctx: &ToolContext, _input: Value) -> Result<Value> {
        let folder = files_folder(self.name(), ctx)?;
        let mut entries = fs::read_dir(folder)
            .await
            .map_err(|err| AgencyError::ToolExecution {
                name: self.name().into(),
                source: Box::new(err),
            })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(json!({ "files": files }))
    }
}

struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two integers."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::strict()
            .required("a", ValueKind::Integer, "First operand")
            .required("b", ValueKind::Integer, "Second operand")
    }

    async fn call(&self, _ctx: &ToolContext, input: Value) -> Result<Value> {
        let a = get_integer(&input, "a", self.name())?;
        let b = get_integer(&input, "b", self.name())?;
        let result = a
            .checked_add(b)
            .ok_or_else(|| AgencyError::tool_failure(self.name(), "integer overflow"))?;
        Ok(json!({ "result": result }))
    }
}

fn get_integer(input: &Value, field: &str, tool: &str) -> Result<i64> {
    input[field].as_i64().ok_or_else(|| AgencyError::Validation {
        tool: tool.to_string(),
        message: format!("field `{field}` does not fit in a 64-bit integer"),
    })
}

fn files_folder<'a>(tool: &str, ctx: &'a ToolContext) -> Result<&'a Path> {
    ctx.files_folder.as_deref().ok_or_else(|| {
        AgencyError::tool_failure(tool, format!("agent `{}` has no files folder", ctx.agent))
    })
}

/// Join `relative` onto the files folder, refusing paths that leave it.
fn resolve_in_folder(tool: &str, ctx: &ToolContext, relative: &str) -> Result<PathBuf> {
    let folder = files_folder(tool, ctx)?;
    let candidate = Path::new(relative);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        return Err(AgencyError::tool_failure(
            tool,
            format!("path `{relative}` is outside the files folder"),
        ));
    }
    Ok(folder.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tool::ToolRegistry;

    fn ctx_with(folder: &Path) -> ToolContext {
        ToolContext {
            agent: "Agent1".into(),
            files_folder: Some(folder.to_path_buf()),
        }
    }

    #[test]
    fn resolves_builtin_tools_and_rejects_unknown_ones() {
        let catalog = ToolCatalog::builtin();
        assert_eq!(catalog.names(), vec!["add", "echo", "list_files", "read_file"]);
        assert!(catalog.resolve("echo").is_ok());

        let err = catalog.resolve("TestTool").err().unwrap();
        assert!(matches!(err, AgencyError::Configuration(_)));
        assert!(err.to_string().contains("TestTool"));
    }

    #[tokio::test]
    async fn reads_and_lists_files_in_the_agent_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "hello agency").unwrap();
        std::fs::write(dir.path().join("a.txt"), "first").unwrap();
        let ctx = ctx_with(dir.path());

        let read = ReadFileTool.call(&ctx, json!({"path": "notes.md"})).await.unwrap();
        assert_eq!(read["contents"], "hello agency");

        let listed = ListFilesTool.call(&ctx, json!({})).await.unwrap();
        assert_eq!(listed["files"], json!(["a.txt", "notes.md"]));
    }

    #[tokio::test]
    async fn refuses_paths_outside_the_folder() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with(dir.path());

        for path in ["../secret", "/etc/passwd", ""] {
            let err = ReadFileTool.call(&ctx, json!({"path": path})).await.unwrap_err();
            assert!(matches!(err, AgencyError::ToolExecution { .. }), "{path}");
        }
    }

    #[tokio::test]
    async fn file_tools_need_a_files_folder() {
        let ctx = ToolContext {
            agent: "Agent2".into(),
            files_folder: None,
        };
        let err = ListFilesTool.call(&ctx, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("has no files folder"));
    }

    #[tokio::test]
    async fn add_validates_through_the_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AddTool)).unwrap();
        let ctx = ToolContext::default();

        let sum = registry
            .call(&ctx, "add", json!({"a": 2, "b": 40}))
            .await
            .unwrap();
        assert_eq!(sum["result"], 42);

        let err = registry
            .call(&ctx, "add", json!({"a": "two", "b": 40}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Validation { .. }));

        let overflow = registry
            .call(&ctx, "add", json!({"a": i64::MAX, "b": 1}))
            .await
            .unwrap_err();
        assert!(matches!(overflow, AgencyError::ToolExecution { .. }));
    }
}
