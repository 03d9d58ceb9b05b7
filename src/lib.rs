//! Declarative multi-agent agencies.
//!
//! The crate provides:
//! - Agent descriptors (`AgentDescriptor`) with validated generation settings.
//! - A tool interface (`Tool`, `ToolRegistry`) with structural argument schemas.
//! - An `Agency` that composes agents under a flat or hierarchical `Topology`.
//! - A `Session` that runs turns against a `LanguageModel` and lets agents
//!   message each other along the topology.
//! - A TOML configuration layer and an interactive `Console`.

mod agency;
mod agent;
mod config;
mod error;
mod frontend;
mod hooks;
mod llm;
mod memory;
mod message;
mod schema;
mod session;
mod telemetry;
mod tool;
mod toolkit;
mod topology;

pub use agency::{Agency, AgencySettings, GenerationDefaults, GenerationParams, Sender};
pub use agent::{AgentBuilder, AgentDescriptor, InstructionSource, DEFAULT_MODEL, SEND_MESSAGE_TOOL};
pub use config::{
    AgencyConfig, AgencySection, AgentConfig, ModelConfig, RuntimeConfig, TopologyConfig,
    DEFAULT_CONFIG_PATH,
};
pub use error::{AgencyError, Result};
pub use frontend::Console;
pub use hooks::{AgencyHook, EventHook, TurnEvent};
pub use llm::{
    build_model, ChatRequest, EchoModel, LanguageModel, ModelCompletion, OpenAIClient,
    RecordedRequest, StubModel,
};
pub use memory::{ConversationMemory, TokenBudget};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use schema::{ParameterSchema, PropertySchema, ValueKind};
pub use session::{Session, ThreadKey};
pub use telemetry::{init_tracing, LogFormat};
pub use tool::{Tool, ToolContext, ToolDescription, ToolRegistry};
pub use toolkit::ToolCatalog;
pub use topology::{Edge, Topology};
