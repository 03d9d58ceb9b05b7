use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AgencyError, Result};
use crate::schema::ParameterSchema;
use crate::tool::{Tool, ToolContext, ToolRegistry};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Temperatures accepted by the chat backend.
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Tool name the session reserves for inter-agent messages.
pub const SEND_MESSAGE_TOOL: &str = "send_message";

/// Where an agent's instruction text comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionSource {
    Inline(String),
    File(PathBuf),
}

impl InstructionSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        InstructionSource::File(path.into())
    }

    pub fn resolve(&self) -> Result<String> {
        match self {
            InstructionSource::Inline(text) => Ok(text.clone()),
            InstructionSource::File(path) => std::fs::read_to_string(path).map_err(|err| {
                AgencyError::config(format!(
                    "cannot read instructions `{}`: {err}",
                    path.display()
                ))
            }),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            InstructionSource::File(path) => Some(path),
            InstructionSource::Inline(_) => None,
        }
    }
}

impl From<&str> for InstructionSource {
    fn from(text: &str) -> Self {
        InstructionSource::Inline(text.to_string())
    }
}

/// Immutable configuration of one agent.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    name: String,
    description: String,
    instructions: String,
    instructions_path: Option<PathBuf>,
    files_folder: Option<PathBuf>,
    schemas_folder: Option<PathBuf>,
    tools: ToolRegistry,
    model: String,
    temperature: Option<f32>,
    max_prompt_tokens: Option<u32>,
}

impl AgentDescriptor {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Resolved instruction text.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn instructions_path(&self) -> Option<&Path> {
        self.instructions_path.as_deref()
    }

    pub fn files_folder(&self) -> Option<&Path> {
        self.files_folder.as_deref()
    }

    pub fn schemas_folder(&self) -> Option<&Path> {
        self.schemas_folder.as_deref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Explicit override, `None` when the agency default applies.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Explicit override, `None` when the agency default applies.
    pub fn max_prompt_tokens(&self) -> Option<u32> {
        self.max_prompt_tokens
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            agent: self.name.clone(),
            files_folder: self.files_folder.clone(),
        }
    }
}

pub struct AgentBuilder {
    name: String,
    description: String,
    instructions: Option<InstructionSource>,
    files_folder: Option<PathBuf>,
    schemas_folder: Option<PathBuf>,
    tools: Vec<Arc<dyn Tool>>,
    model: String,
    temperature: Option<f32>,
    max_prompt_tokens: Option<u32>,
}

impl AgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: None,
            files_folder: None,
            schemas_folder: None,
            tools: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_prompt_tokens: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instructions(mut self, source: impl Into<InstructionSource>) -> Self {
        self.instructions = Some(source.into());
        self
    }

    pub fn with_files_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.files_folder = Some(folder.into());
        self
    }

    pub fn with_schemas_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.schemas_folder = Some(folder.into());
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_prompt_tokens(mut self, tokens: u32) -> Self {
        self.max_prompt_tokens = Some(tokens);
        self
    }

    /// Validate the configuration and resolve every resource it references.
    pub fn build(self) -> Result<AgentDescriptor> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AgencyError::config("agent name must not be empty"));
        }
        let invalid = |msg: String| AgencyError::config(format!("agent `{name}`: {msg}"));
        let scoped = |err: AgencyError| match err {
            AgencyError::Configuration(msg) => invalid(msg),
            other => other,
        };

        if self.model.trim().is_empty() {
            return Err(invalid("model must not be empty".into()));
        }
        if let Some(t) = self.temperature {
            check_temperature(t).map_err(invalid)?;
        }
        if self.max_prompt_tokens == Some(0) {
            return Err(invalid("max_prompt_tokens must be positive".into()));
        }
        for folder in [&self.files_folder, &self.schemas_folder].into_iter().flatten() {
            if !folder.is_dir() {
                return Err(invalid(format!(
                    "resource folder `{}` does not exist",
                    folder.display()
                )));
            }
        }

        let (instructions, instructions_path) = match &self.instructions {
            Some(source) => (
                source.resolve().map_err(scoped)?,
                source.path().map(Path::to_path_buf),
            ),
            None => (String::new(), None),
        };

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            if tool.name() == SEND_MESSAGE_TOOL {
                return Err(invalid(format!(
                    "tool name `{SEND_MESSAGE_TOOL}` is reserved"
                )));
            }
            let schema = match schema_override(self.schemas_folder.as_deref(), tool.name())
                .map_err(scoped)?
            {
                Some(schema) => schema,
                None => tool.parameters(),
            };
            tools
                .register_with_schema(tool, schema)
                .map_err(scoped)?;
        }

        tracing::debug!(agent = %name, tools = ?tools.names(), "agent descriptor built");

        Ok(AgentDescriptor {
            name,
            description: self.description,
            instructions,
            instructions_path,
            files_folder: self.files_folder,
            schemas_folder: self.schemas_folder,
            tools,
            model: self.model,
            temperature: self.temperature,
            max_prompt_tokens: self.max_prompt_tokens,
        })
    }
}

pub(crate) fn check_temperature(t: f32) -> std::result::Result<(), String> {
    if TEMPERATURE_RANGE.contains(&t) {
        Ok(())
    } else {
        Err(format!(
            "temperature {t} is outside {}..={}",
            TEMPERATURE_RANGE.start(),
            TEMPERATURE_RANGE.end()
        ))
    }
}

/// `<schemas folder>/<tool>.json` replaces the tool's own schema when present.
fn schema_override(folder: Option<&Path>, tool: &str) -> Result<Option<ParameterSchema>> {
    let Some(folder) = folder else {
        return Ok(None);
    };
    let path = folder.join(format!("{tool}.json"));
    if !path.is_file() {
        return Ok(None);
    }
    ParameterSchema::from_file(&path).map(Some)
}
