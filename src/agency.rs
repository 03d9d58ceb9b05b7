use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::{check_temperature, AgentDescriptor, InstructionSource};
use crate::error::{AgencyError, Result};
use crate::topology::Topology;

/// Generation parameters applied to agents that do not override them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub temperature: f32,
    pub max_prompt_tokens: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_prompt_tokens: 25_000,
        }
    }
}

/// Parameters in effect for one dispatch to one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_prompt_tokens: u32,
}

/// Originator of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Agent(String),
}

impl Sender {
    pub fn agent(name: impl Into<String>) -> Self {
        Sender::Agent(name.into())
    }

    pub fn label(&self) -> &str {
        match self {
            Sender::User => "user",
            Sender::Agent(name) => name,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Agency-wide settings passed explicitly to `Agency::new`.
#[derive(Debug, Clone, Default)]
pub struct AgencySettings {
    pub topology: Topology,
    pub shared_instructions: Option<InstructionSource>,
    pub defaults: GenerationDefaults,
    /// Member that receives user input. Defaults to the first member.
    pub entry: Option<String>,
}

/// The composed set of agents and the rules for addressing them. Immutable
/// once built.
#[derive(Debug)]
pub struct Agency {
    members: Vec<AgentDescriptor>,
    index: HashMap<String, usize>,
    topology: Topology,
    shared_instructions: String,
    defaults: GenerationDefaults,
    entry: usize,
}

impl Agency {
    pub fn new(members: Vec<AgentDescriptor>, settings: AgencySettings) -> Result<Self> {
        if members.is_empty() {
            return Err(AgencyError::config("an agency needs at least one agent"));
        }

        let mut index = HashMap::with_capacity(members.len());
        for (i, agent) in members.iter().enumerate() {
            if index.insert(agent.name().to_string(), i).is_some() {
                return Err(AgencyError::config(format!(
                    "agent name `{}` is used more than once",
                    agent.name()
                )));
            }
        }

        let names: HashSet<&str> = members.iter().map(AgentDescriptor::name).collect();
        settings.topology.validate(&names)?;

        check_temperature(settings.defaults.temperature)
            .map_err(|msg| AgencyError::config(format!("agency defaults: {msg}")))?;
        if settings.defaults.max_prompt_tokens == 0 {
            return Err(AgencyError::config(
                "agency defaults: max_prompt_tokens must be positive",
            ));
        }

        let entry = match &settings.entry {
            Some(name) => *index.get(name).ok_or_else(|| {
                AgencyError::config(format!("entry agent `{name}` is not a member"))
            })?,
            None => 0,
        };

        let shared_instructions = match &settings.shared_instructions {
            Some(source) => source.resolve()?,
            None => String::new(),
        };

        tracing::info!(
            members = members.len(),
            entry = %members[entry].name(),
            flat = settings.topology.is_flat(),
            "agency assembled"
        );

        Ok(Self {
            members,
            index,
            topology: settings.topology,
            shared_instructions,
            defaults: settings.defaults,
            entry,
        })
    }

    pub fn members(&self) -> &[AgentDescriptor] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&AgentDescriptor> {
        self.index.get(name).map(|&i| &self.members[i])
    }

    pub fn entry(&self) -> &AgentDescriptor {
        &self.members[self.entry]
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn shared_instructions(&self) -> &str {
        &self.shared_instructions
    }

    pub fn defaults(&self) -> GenerationDefaults {
        self.defaults
    }

    /// Check that `from` may address `to` and return the recipient.
    pub fn route(&self, from: &Sender, to: &str) -> Result<&AgentDescriptor> {
        let refuse = |reason: String| AgencyError::Routing {
            from: from.label().to_string(),
            to: to.to_string(),
            reason,
        };

        let recipient = self
            .member(to)
            .ok_or_else(|| refuse("no such agent in the agency".into()))?;

        match from {
            Sender::User => {
                if self.topology.is_flat() || recipient.name() == self.entry().name() {
                    Ok(recipient)
                } else {
                    Err(refuse(format!(
                        "the user may only address `{}`",
                        self.entry().name()
                    )))
                }
            }
            Sender::Agent(name) => {
                if self.member(name).is_none() {
                    return Err(refuse("sender is not a member of the agency".into()));
                }
                if name == to {
                    return Err(refuse("an agent cannot address itself".into()));
                }
                if self.topology.allows(name, to) {
                    Ok(recipient)
                } else {
                    Err(refuse("no communication edge between these agents".into()))
                }
            }
        }
    }

    /// Members the user may address directly.
    pub fn user_recipients(&self) -> Vec<&str> {
        if self.topology.is_flat() {
            self.members.iter().map(AgentDescriptor::name).collect()
        } else {
            vec![self.entry().name()]
        }
    }

    /// Members agent `from` may address.
    pub fn recipients_of(&self, from: &str) -> Vec<&str> {
        self.topology
            .recipients(from, self.members.iter().map(AgentDescriptor::name))
    }

    /// Parameters for a dispatch to `agent`. Agency defaults are applied
    /// here, at dispatch time, for every value the agent leaves unset.
    pub fn generation_params(&self, agent: &AgentDescriptor) -> GenerationParams {
        GenerationParams {
            model: agent.model().to_string(),
            temperature: agent.temperature().unwrap_or(self.defaults.temperature),
            max_prompt_tokens: agent
                .max_prompt_tokens()
                .unwrap_or(self.defaults.max_prompt_tokens),
        }
    }

    /// Shared instructions followed by the agent's own instructions.
    pub fn system_prompt(&self, agent: &AgentDescriptor) -> String {
        let mut prompt = String::new();
        if !self.shared_instructions.trim().is_empty() {
            prompt.push_str(self.shared_instructions.trim_end());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!("You are {}.", agent.name()));
        if !agent.description().is_empty() {
            prompt.push(' ');
            prompt.push_str(agent.description());
        }
        if !agent.instructions().trim().is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(agent.instructions().trim_end());
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentDescriptor {
        AgentDescriptor::builder(name).build().unwrap()
    }

    fn hierarchy() -> Agency {
        Agency::new(
            vec![agent("Supervisor"), agent("Worker"), agent("Auditor")],
            AgencySettings {
                topology: Topology::hierarchical([("Supervisor", "Worker")]),
                ..AgencySettings::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_and_duplicate_members() {
        let err = Agency::new(Vec::new(), AgencySettings::default()).unwrap_err();
        assert!(matches!(err, AgencyError::Configuration(_)));

        let err = Agency::new(vec![agent("Agent1"), agent("Agent1")], AgencySettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("used more than once"));
    }

    #[test]
    fn rejects_bad_settings() {
        let bad_entry = AgencySettings {
            entry: Some("Ghost".into()),
            ..AgencySettings::default()
        };
        assert!(Agency::new(vec![agent("Agent1")], bad_entry).is_err());

        let bad_edge = AgencySettings {
            topology: Topology::hierarchical([("Agent1", "Ghost")]),
            ..AgencySettings::default()
        };
        assert!(Agency::new(vec![agent("Agent1")], bad_edge).is_err());

        let bad_defaults = AgencySettings {
            defaults: GenerationDefaults {
                temperature: 0.0,
                max_prompt_tokens: 0,
            },
            ..AgencySettings::default()
        };
        assert!(Agency::new(vec![agent("Agent1")], bad_defaults).is_err());

        let missing_manifesto = AgencySettings {
            shared_instructions: Some(InstructionSource::file("/nonexistent/agency_manifesto.md")),
            ..AgencySettings::default()
        };
        assert!(Agency::new(vec![agent("Agent1")], missing_manifesto).is_err());
    }

    #[test]
    fn flat_members_address_each_other() {
        let agency = Agency::new(vec![agent("Agent1"), agent("Agent2")], AgencySettings::default())
            .unwrap();

        assert_eq!(agency.route(&Sender::agent("Agent1"), "Agent2").unwrap().name(), "Agent2");
        assert_eq!(agency.route(&Sender::agent("Agent2"), "Agent1").unwrap().name(), "Agent1");
        assert!(agency.route(&Sender::User, "Agent2").is_ok());
        assert!(agency.route(&Sender::agent("Agent1"), "Agent1").is_err());
        assert_eq!(agency.recipients_of("Agent1"), vec!["Agent2"]);
    }

    #[test]
    fn hierarchy_only_routes_along_edges() {
        let agency = hierarchy();

        assert!(agency.route(&Sender::agent("Supervisor"), "Worker").is_ok());
        let err = agency.route(&Sender::agent("Worker"), "Auditor").unwrap_err();
        assert!(matches!(err, AgencyError::Routing { .. }));
        assert!(agency.route(&Sender::agent("Worker"), "Supervisor").is_err());
        assert!(agency.route(&Sender::agent("Supervisor"), "Nobody").is_err());
        assert!(agency.route(&Sender::agent("Stranger"), "Worker").is_err());
    }

    #[test]
    fn user_reaches_only_the_entry_of_a_hierarchy() {
        let agency = hierarchy();
        assert_eq!(agency.entry().name(), "Supervisor");
        assert!(agency.route(&Sender::User, "Supervisor").is_ok());
        assert!(agency.route(&Sender::User, "Worker").is_err());
        assert_eq!(agency.user_recipients(), vec!["Supervisor"]);
    }

    #[test]
    fn defaults_fill_in_missing_overrides() {
        let tuned = AgentDescriptor::builder("Tuned")
            .with_temperature(0.7)
            .with_max_prompt_tokens(1_000)
            .build()
            .unwrap();
        let agency = Agency::new(
            vec![agent("Plain"), tuned],
            AgencySettings {
                defaults: GenerationDefaults {
                    temperature: 0.0,
                    max_prompt_tokens: 25_000,
                },
                ..AgencySettings::default()
            },
        )
        .unwrap();

        let plain = agency.generation_params(agency.member("Plain").unwrap());
        assert_eq!(plain.temperature, 0.0);
        assert_eq!(plain.max_prompt_tokens, 25_000);

        let tuned = agency.generation_params(agency.member("Tuned").unwrap());
        assert_eq!(tuned.temperature, 0.7);
        assert_eq!(tuned.max_prompt_tokens, 1_000);
    }

    #[test]
    fn system_prompt_prepends_shared_instructions() {
        let worker = AgentDescriptor::builder("Worker")
            .with_description("Does the work.")
            .with_instructions("Use tools when needed.")
            .build()
            .unwrap();
        let agency = Agency::new(
            vec![worker],
            AgencySettings {
                shared_instructions: Some("Be kind.".into()),
                ..AgencySettings::default()
            },
        )
        .unwrap();

        let prompt = agency.system_prompt(agency.entry());
        assert_eq!(
            prompt,
            "Be kind.\n\nYou are Worker. Does the work.\n\nUse tools when needed."
        );
    }
}
