use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agency::{Agency, AgencySettings, GenerationDefaults};
use crate::agent::{AgentDescriptor, InstructionSource, DEFAULT_MODEL};
use crate::error::{AgencyError, Result};
use crate::toolkit::ToolCatalog;
use crate::topology::Topology;

pub const DEFAULT_CONFIG_PATH: &str = "agency/agency.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            base_url: None,
            organization: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyConfig {
    #[default]
    Flat,
    Hierarchical {
        #[serde(default)]
        edges: Vec<(String, String)>,
    },
}

impl TopologyConfig {
    fn to_topology(&self) -> Topology {
        match self {
            TopologyConfig::Flat => Topology::Flat,
            TopologyConfig::Hierarchical { edges } => {
                Topology::hierarchical(edges.iter().cloned())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgencySection {
    #[serde(default)]
    pub shared_instructions: Option<PathBuf>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: u32,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub topology: TopologyConfig,
}

impl Default for AgencySection {
    fn default() -> Self {
        Self {
            shared_instructions: None,
            temperature: default_temperature(),
            max_prompt_tokens: default_max_prompt_tokens(),
            entry: None,
            topology: TopologyConfig::default(),
        }
    }
}

fn default_temperature() -> f32 {
    GenerationDefaults::default().temperature
}

fn default_max_prompt_tokens() -> u32 {
    GenerationDefaults::default().max_prompt_tokens
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: Option<PathBuf>,
    #[serde(default)]
    pub files_folder: Option<PathBuf>,
    #[serde(default)]
    pub schemas_folder: Option<PathBuf>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_prompt_tokens: Option<u32>,
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Model calls allowed per turn.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// How many nested agent-to-agent messages a turn may open.
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_delegation_depth: default_max_delegation_depth(),
        }
    }
}

fn default_max_steps() -> usize {
    8
}

fn default_max_delegation_depth() -> usize {
    4
}

/// Everything the binary needs to assemble an agency, read from one TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgencyConfig {
    #[serde(default)]
    pub agency: AgencySection,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Directory relative resource paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl AgencyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AgencyError::config(format!("cannot read `{}`: {err}", path.display()))
        })?;
        let mut cfg: Self = toml::from_str(&raw)
            .map_err(|err| AgencyError::config(format!("Failed to parse configuration: {err}")))?;
        cfg.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env(|key| env::var(key).ok());
        Ok(cfg)
    }

    /// Apply `AGENCY_*` overrides. `OPENAI_API_KEY` only fills a missing key.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("AGENCY_MODEL_PROVIDER") {
            self.model.provider = provider;
        }
        if let Some(key) = lookup("AGENCY_API_KEY") {
            self.model.api_key = Some(key);
        } else if self.model.api_key.is_none() {
            self.model.api_key = lookup("OPENAI_API_KEY");
        }
        if let Some(url) = lookup("AGENCY_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Some(org) = lookup("AGENCY_ORGANIZATION") {
            self.model.organization = Some(org);
        }
        if let Some(temperature) = lookup("AGENCY_DEFAULT_TEMPERATURE") {
            match temperature.parse::<f32>() {
                Ok(parsed) => self.agency.temperature = parsed,
                Err(_) => {
                    tracing::warn!(%temperature, "ignoring unparsable AGENCY_DEFAULT_TEMPERATURE")
                }
            }
        }
        if let Some(tokens) = lookup("AGENCY_MAX_PROMPT_TOKENS") {
            match tokens.parse::<u32>() {
                Ok(parsed) => self.agency.max_prompt_tokens = parsed,
                Err(_) => {
                    tracing::warn!(%tokens, "ignoring unparsable AGENCY_MAX_PROMPT_TOKENS")
                }
            }
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Build every agent descriptor, resolving tool names through `catalog`.
    pub fn build_agents(&self, catalog: &ToolCatalog) -> Result<Vec<AgentDescriptor>> {
        self.agents
            .iter()
            .map(|agent| {
                let mut builder = AgentDescriptor::builder(&agent.name)
                    .with_description(&agent.description)
                    .with_model(&agent.model);
                if let Some(path) = &agent.instructions {
                    builder = builder
                        .with_instructions(InstructionSource::file(self.resolve_path(path)));
                }
                if let Some(folder) = &agent.files_folder {
                    builder = builder.with_files_folder(self.resolve_path(folder));
                }
                if let Some(folder) = &agent.schemas_folder {
                    builder = builder.with_schemas_folder(self.resolve_path(folder));
                }
                if let Some(t) = agent.temperature {
                    builder = builder.with_temperature(t);
                }
                if let Some(tokens) = agent.max_prompt_tokens {
                    builder = builder.with_max_prompt_tokens(tokens);
                }
                for name in &agent.tools {
                    let tool = catalog.resolve(name).map_err(|err| match err {
                        AgencyError::Configuration(msg) => {
                            AgencyError::config(format!("agent `{}`: {msg}", agent.name))
                        }
                        other => other,
                    })?;
                    builder = builder.with_tool(tool);
                }
                builder.build()
            })
            .collect()
    }

    pub fn settings(&self) -> AgencySettings {
        AgencySettings {
            topology: self.agency.topology.to_topology(),
            shared_instructions: self
                .agency
                .shared_instructions
                .as_deref()
                .map(|path| InstructionSource::file(self.resolve_path(path))),
            defaults: GenerationDefaults {
                temperature: self.agency.temperature,
                max_prompt_tokens: self.agency.max_prompt_tokens,
            },
            entry: self.agency.entry.clone(),
        }
    }

    pub fn build_agency(&self, catalog: &ToolCatalog) -> Result<Agency> {
        let members = self.build_agents(catalog)?;
        Agency::new(members, self.settings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("agency.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_defaults_for_missing_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[[agents]]\nname = 'Agent1'").unwrap();

        let cfg = AgencyConfig::from_file(file.path()).unwrap();

        assert_eq!(cfg.model.provider, "openai");
        assert_eq!(cfg.agency.topology, TopologyConfig::Flat);
        assert_eq!(cfg.agency.max_prompt_tokens, 25_000);
        assert_eq!(cfg.runtime.max_steps, 8);
        assert_eq!(cfg.agents[0].model, DEFAULT_MODEL);
    }

    #[test]
    fn applies_environment_overrides() {
        let mut cfg = AgencyConfig::default();
        let vars: HashMap<&str, &str> = [
            ("AGENCY_MODEL_PROVIDER", "echo"),
            ("OPENAI_API_KEY", "sk-fallback"),
            ("AGENCY_BASE_URL", "http://localhost:8000/v1"),
            ("AGENCY_DEFAULT_TEMPERATURE", "0.4"),
            ("AGENCY_MAX_PROMPT_TOKENS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        cfg.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.model.provider, "echo");
        assert_eq!(cfg.model.api_key.as_deref(), Some("sk-fallback"));
        assert_eq!(cfg.model.base_url.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(cfg.agency.temperature, 0.4);
        assert_eq!(cfg.agency.max_prompt_tokens, 25_000);
    }

    #[test]
    fn agency_key_wins_over_file_and_openai_key() {
        let mut cfg = AgencyConfig::default();
        cfg.model.api_key = Some("from-file".into());

        cfg.apply_env(|key| (key == "OPENAI_API_KEY").then(|| "sk-openai".to_string()));
        assert_eq!(cfg.model.api_key.as_deref(), Some("from-file"));

        cfg.apply_env(|key| (key == "AGENCY_API_KEY").then(|| "sk-agency".to_string()));
        assert_eq!(cfg.model.api_key.as_deref(), Some("sk-agency"));
    }

    #[test]
    fn builds_a_hierarchical_agency_relative_to_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ceo/files")).unwrap();
        fs::write(dir.path().join("manifesto.md"), "Shared rules.").unwrap();
        fs::write(dir.path().join("ceo/instructions.md"), "Delegate.").unwrap();
        let path = write_config(
            dir.path(),
            r#"
[agency]
shared_instructions = "manifesto.md"
temperature = 0.0
max_prompt_tokens = 12000
topology = { kind = "hierarchical", edges = [["Ceo", "Dev"]] }

[[agents]]
name = "Ceo"
instructions = "ceo/instructions.md"
files_folder = "ceo/files"
tools = ["list_files"]

[[agents]]
name = "Dev"
tools = ["echo", "add"]
temperature = 0.2
"#,
        );

        let cfg = AgencyConfig::from_file(&path).unwrap();
        let agency = cfg.build_agency(&ToolCatalog::builtin()).unwrap();

        assert_eq!(agency.entry().name(), "Ceo");
        assert_eq!(agency.shared_instructions(), "Shared rules.");
        assert_eq!(agency.member("Ceo").unwrap().instructions(), "Delegate.");
        assert_eq!(agency.member("Dev").unwrap().tools().names(), vec!["echo", "add"]);
        assert_eq!(agency.recipients_of("Ceo"), vec!["Dev"]);
        assert!(agency.recipients_of("Dev").is_empty());
        assert_eq!(agency.defaults().max_prompt_tokens, 12_000);
    }

    #[test]
    fn unknown_tools_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "[[agents]]\nname = 'Agent1'\ntools = ['TestTool']\n",
        );

        let cfg = AgencyConfig::from_file(&path).unwrap();
        let err = cfg.build_agency(&ToolCatalog::builtin()).unwrap_err();

        assert!(matches!(err, AgencyError::Configuration(_)));
        assert!(err.to_string().contains("unknown tool `TestTool`"));
    }

    #[test]
    fn empty_agent_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[agency]\ntemperature = 0.0\n");

        let cfg = AgencyConfig::from_file(&path).unwrap();
        assert!(cfg.build_agency(&ToolCatalog::builtin()).is_err());
    }

    #[test]
    fn malformed_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[[agents]\nname = ");
        let err = AgencyConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse configuration"));
    }
}
