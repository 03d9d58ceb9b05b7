//! Turn runtime over an immutable [`Agency`].
//!
//! A `Session` owns the mutable side of a conversation: one transcript per
//! (sender, recipient) pair. Each turn resolves the recipient through the
//! agency's topology, applies the agency defaults, and alternates between the
//! model and the agent's tools until the model replies with text. Agents reach
//! each other through the reserved `send_message` tool, which opens a nested
//! turn along a topology edge.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agency::{Agency, Sender};
use crate::agent::{AgentDescriptor, SEND_MESSAGE_TOOL};
use crate::config::RuntimeConfig;
use crate::error::{AgencyError, Result};
use crate::hooks::AgencyHook;
use crate::llm::{ChatRequest, LanguageModel};
use crate::memory::{ConversationMemory, TokenBudget};
use crate::message::{Message, ToolCall, ToolResult};
use crate::schema::{ParameterSchema, ValueKind};
use crate::tool::ToolDescription;

/// Identifies one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub from: Sender,
    pub to: String,
}

pub struct Session {
    agency: Arc<Agency>,
    model: Arc<dyn LanguageModel>,
    hooks: Vec<Arc<dyn AgencyHook>>,
    threads: Mutex<HashMap<ThreadKey, ConversationMemory>>,
    max_steps: usize,
    max_delegation_depth: usize,
}

impl Session {
    pub fn new(agency: Arc<Agency>, model: Arc<dyn LanguageModel>) -> Self {
        let runtime = RuntimeConfig::default();
        Self {
            agency,
            model,
            hooks: Vec::new(),
            threads: Mutex::new(HashMap::new()),
            max_steps: runtime.max_steps,
            max_delegation_depth: runtime.max_delegation_depth,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgencyHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_max_delegation_depth(mut self, depth: usize) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    pub fn with_runtime(self, runtime: &RuntimeConfig) -> Self {
        self.with_max_steps(runtime.max_steps)
            .with_max_delegation_depth(runtime.max_delegation_depth)
    }

    pub fn agency(&self) -> &Agency {
        &self.agency
    }

    /// Copy of the transcript between `from` and `to`.
    pub async fn thread(&self, from: &Sender, to: &str) -> ConversationMemory {
        let key = ThreadKey {
            from: from.clone(),
            to: to.to_string(),
        };
        self.threads.lock().await.get(&key).cloned().unwrap_or_default()
    }

    /// Forget every transcript.
    pub async fn reset(&self) {
        self.threads.lock().await.clear();
    }

    /// Deliver `content` from `from` to agent `to` and return the agent's reply.
    pub async fn send(&self, from: Sender, to: &str, content: impl Into<String>) -> Result<String> {
        self.run_turn(from, to.to_string(), content.into(), 0).await
    }

    fn run_turn(
        &self,
        from: Sender,
        to: String,
        content: String,
        depth: usize,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let agent = self.agency.route(&from, &to)?;
            let params = self.agency.generation_params(agent);
            let budget = TokenBudget::new(params.max_prompt_tokens);
            let system = Message::system(self.agency.system_prompt(agent));
            let tools = self.tool_descriptions(agent);
            let ctx = agent.tool_context();

            let key = ThreadKey {
                from: from.clone(),
                to: to.clone(),
            };
            let mut memory = self.threads.lock().await.get(&key).cloned().unwrap_or_default();
            let history_len = memory.len();

            tracing::info!(%from, %to, depth, temperature = params.temperature, "dispatching turn");
            for hook in &self.hooks {
                hook.on_message(&from, &to, &content).await?;
            }
            memory.push(Message::user(content));

            for _ in 0..self.max_steps {
                let mut prompt = Vec::with_capacity(memory.len() + 1);
                prompt.push(system.clone());
                prompt.extend(memory.iter().cloned());
                let prompt = budget.fit(&prompt);

                let completion = self
                    .model
                    .complete_chat(ChatRequest {
                        model: &params.model,
                        messages: &prompt,
                        tools: &tools,
                        temperature: params.temperature,
                    })
                    .await?;

                if completion.tool_calls.is_empty() {
                    let reply = completion.content.unwrap_or_default();
                    memory.push(Message::assistant(&reply));
                    // Nested or concurrent turns may have written to this
                    // thread since it was read; append this exchange after them.
                    self.threads
                        .lock()
                        .await
                        .entry(key)
                        .or_default()
                        .extend(memory.as_slice()[history_len..].iter().cloned());
                    for hook in &self.hooks {
                        hook.on_reply(agent.name(), &from, &reply).await?;
                    }
                    return Ok(reply);
                }

                let calls: Vec<ToolCall> = completion
                    .tool_calls
                    .into_iter()
                    .map(|mut call| {
                        if call.id.is_none() {
                            call.id = Some(format!("call_{}", Uuid::new_v4().simple()));
                        }
                        call
                    })
                    .collect();
                memory.push(Message::tool_calls(completion.content, calls.clone()));

                for call in calls {
                    for hook in &self.hooks {
                        hook.before_tool_call(agent.name(), &call).await?;
                    }
                    let outcome = if call.name == SEND_MESSAGE_TOOL {
                        self.deliver(agent, &call.arguments, depth).await
                    } else {
                        agent
                            .tools()
                            .call(&ctx, &call.name, call.arguments.clone())
                            .await
                    };
                    let (output, failed) = match outcome {
                        Ok(value) => (value, false),
                        Err(err) if err.is_turn_local() => {
                            tracing::warn!(agent = %agent.name(), tool = %call.name, error = %err, "tool call failed");
                            (json!({ "error": err.to_string() }), true)
                        }
                        Err(err) => return Err(err),
                    };
                    let result = ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        output,
                        failed,
                    };
                    for hook in &self.hooks {
                        hook.after_tool_result(agent.name(), &result).await?;
                    }
                    memory.push(Message::tool(result));
                }
            }

            Err(AgencyError::Protocol(format!(
                "agent `{}` reached the step limit of {} without replying",
                agent.name(),
                self.max_steps
            )))
        })
    }

    /// Run `send_message` for `agent`: a nested turn along a topology edge.
    async fn deliver(&self, agent: &AgentDescriptor, arguments: &Value, depth: usize) -> Result<Value> {
        send_message_schema().validate(SEND_MESSAGE_TOOL, arguments)?;
        let recipient = arguments["recipient"].as_str().unwrap_or_default();
        let message = arguments["message"].as_str().unwrap_or_default();

        if depth >= self.max_delegation_depth {
            return Err(AgencyError::tool_failure(
                SEND_MESSAGE_TOOL,
                format!(
                    "delegation depth limit of {} reached",
                    self.max_delegation_depth
                ),
            ));
        }

        let reply = self
            .run_turn(
                Sender::agent(agent.name()),
                recipient.to_string(),
                message.to_string(),
                depth + 1,
            )
            .await
            .map_err(|err| match err {
                AgencyError::Protocol(msg) | AgencyError::LanguageModel(msg) => {
                    AgencyError::tool_failure(SEND_MESSAGE_TOOL, format!("{recipient}: {msg}"))
                }
                other => other,
            })?;

        Ok(json!({ "recipient": recipient, "reply": reply }))
    }

    fn tool_descriptions(&self, agent: &AgentDescriptor) -> Vec<ToolDescription> {
        let mut tools = agent.tools().describe();
        let recipients = self.agency.recipients_of(agent.name());
        if recipients.is_empty() {
            return tools;
        }

        let listing: Vec<String> = recipients
            .iter()
            .map(|name| match self.agency.member(name) {
                Some(member) if !member.description().is_empty() => {
                    format!("{name}: {}", member.description())
                }
                _ => name.to_string(),
            })
            .collect();
        let schema = send_message_schema().one_of(
            "recipient",
            recipients.iter().map(|name| json!(name)).collect(),
        );
        tools.push(ToolDescription {
            name: SEND_MESSAGE_TOOL.to_string(),
            description: format!(
                "Send a message to another agent and wait for its reply. Recipients: {}",
                listing.join("; ")
            ),
            parameters: schema.to_json_schema(),
        });
        tools
    }
}

fn send_message_schema() -> ParameterSchema {
    ParameterSchema::strict()
        .required("recipient", ValueKind::String, "Name of the agent to address")
        .required("message", ValueKind::String, "Message for the recipient")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::agency::AgencySettings;
    use crate::llm::{ModelCompletion, StubModel};
    use crate::topology::Topology;

    fn agency(topology: Topology) -> Arc<Agency> {
        let members = ["Agent1", "Agent2", "Agent3"]
            .into_iter()
            .map(|name| {
                AgentDescriptor::builder(name)
                    .with_description(format!("{name} helps"))
                    .build()
                    .unwrap()
            })
            .collect();
        Arc::new(
            Agency::new(
                members,
                AgencySettings {
                    topology,
                    ..AgencySettings::default()
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn offers_send_message_only_to_agents_with_recipients() {
        let session = Session::new(
            agency(Topology::hierarchical([("Agent1", "Agent2")])),
            StubModel::new(Vec::new()),
        );

        let lead = session.agency().member("Agent1").unwrap();
        let tools = session.tool_descriptions(lead);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].parameters["properties"]["recipient"]["enum"], json!(["Agent2"]));
        assert!(tools[0].description.contains("Agent2: Agent2 helps"));

        let worker = session.agency().member("Agent2").unwrap();
        assert!(session.tool_descriptions(worker).is_empty());
    }

    #[tokio::test]
    async fn keeps_threads_per_sender_and_recipient() {
        let model = StubModel::new(vec!["one".into(), "two".into(), "three".into()]);
        let session = Session::new(agency(Topology::Flat), model.clone());

        session.send(Sender::User, "Agent1", "first").await.unwrap();
        session.send(Sender::User, "Agent1", "second").await.unwrap();
        session.send(Sender::User, "Agent2", "other").await.unwrap();

        assert_eq!(session.thread(&Sender::User, "Agent1").await.len(), 4);
        assert_eq!(session.thread(&Sender::User, "Agent2").await.len(), 2);

        // system prompt + first exchange + new user message
        let requests = model.requests();
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[2].messages.len(), 2);

        session.reset().await;
        assert!(session.thread(&Sender::User, "Agent1").await.is_empty());
    }

    #[tokio::test]
    async fn stops_at_the_step_limit() {
        let call = r#"{"action":"call_tool","name":"missing","arguments":{}}"#.to_string();
        let model = StubModel::new(vec![call.clone(), call.clone(), call]);
        let session = Session::new(agency(Topology::Flat), model).with_max_steps(2);

        let err = session.send(Sender::User, "Agent1", "loop").await.unwrap_err();
        assert!(matches!(err, AgencyError::Protocol(_)));
        assert!(session.thread(&Sender::User, "Agent1").await.is_empty());
    }

    #[tokio::test]
    async fn nested_turns_on_the_same_thread_are_kept() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"send_message","arguments":{"recipient":"Agent1","message":"second"}}"#.into(),
            r#"{"action":"call_tool","name":"send_message","arguments":{"recipient":"Agent2","message":"third"}}"#.into(),
            "reply3".into(),
            "reply2".into(),
            "reply1".into(),
        ]);
        let session = Session::new(agency(Topology::Flat), model);

        let reply = session
            .send(Sender::agent("Agent1"), "Agent2", "first")
            .await
            .unwrap();
        assert_eq!(reply, "reply1");

        let thread = session.thread(&Sender::agent("Agent1"), "Agent2").await;
        let contents: Vec<&str> = thread.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(thread.len(), 6);
        assert_eq!(&contents[..2], &["third", "reply3"]);
        assert_eq!(contents[2], "first");
        assert_eq!(contents[5], "reply1");
        // the outer exchange stays contiguous: call, then its result
        assert!(!thread.as_slice()[3].tool_calls.is_empty());
        assert!(thread.as_slice()[4].tool_result.is_some());
    }

    struct SplitModel {
        broken: &'static str,
        inner: Arc<StubModel>,
    }

    #[async_trait::async_trait]
    impl LanguageModel for SplitModel {
        async fn complete_chat(&self, request: ChatRequest<'_>) -> Result<ModelCompletion> {
            if request.model == self.broken {
                return Err(AgencyError::LanguageModel("backend down".into()));
            }
            self.inner.complete_chat(request).await
        }
    }

    #[tokio::test]
    async fn recipient_model_failure_is_a_delivery_failure() {
        let members = vec![
            AgentDescriptor::builder("Agent1").build().unwrap(),
            AgentDescriptor::builder("Agent2")
                .with_model("offline-model")
                .build()
                .unwrap(),
        ];
        let agency = Arc::new(Agency::new(members, AgencySettings::default()).unwrap());
        let model = Arc::new(SplitModel {
            broken: "offline-model",
            inner: StubModel::new(vec![
                r#"{"action":"call_tool","name":"send_message","arguments":{"recipient":"Agent2","message":"hi"}}"#.into(),
                "Agent2 is unavailable".into(),
            ]),
        });
        let session = Session::new(agency, model);

        let reply = session.send(Sender::User, "Agent1", "ask 2").await.unwrap();
        assert_eq!(reply, "Agent2 is unavailable");

        let thread = session.thread(&Sender::User, "Agent1").await;
        let result = thread.iter().find_map(|m| m.tool_result.clone()).unwrap();
        assert!(result.failed);
        let error = result.output["error"].as_str().unwrap();
        assert!(error.contains("Agent2"));
        assert!(error.contains("backend down"));
    }

    #[tokio::test]
    async fn delegation_depth_is_bounded() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"send_message","arguments":{"recipient":"Agent2","message":"hi"}}"#.into(),
            "gave up".into(),
        ]);
        let session = Session::new(agency(Topology::Flat), model).with_max_delegation_depth(0);

        let reply = session.send(Sender::User, "Agent1", "delegate").await.unwrap();
        assert_eq!(reply, "gave up");

        let thread = session.thread(&Sender::User, "Agent1").await;
        let result = thread.iter().find_map(|m| m.tool_result.clone()).unwrap();
        assert!(result.failed);
        assert!(result.output["error"].as_str().unwrap().contains("depth limit"));
    }
}
