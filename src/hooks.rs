use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::agency::Sender;
use crate::error::Result;
use crate::message::{ToolCall, ToolResult};

/// Observer for everything that happens inside a turn. Every method defaults
/// to a no-op.
#[async_trait]
pub trait AgencyHook: Send + Sync {
    async fn on_message(&self, _from: &Sender, _to: &str, _content: &str) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _agent: &str, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn after_tool_result(&self, _agent: &str, _result: &ToolResult) -> Result<()> {
        Ok(())
    }

    async fn on_reply(&self, _agent: &str, _to: &Sender, _content: &str) -> Result<()> {
        Ok(())
    }
}

/// Turn progress as plain data, for front-ends that render it.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Message {
        from: Sender,
        to: String,
        content: String,
    },
    ToolCall {
        agent: String,
        call: ToolCall,
    },
    ToolResult {
        agent: String,
        result: ToolResult,
    },
    Reply {
        agent: String,
        to: Sender,
        content: String,
    },
}

/// Forwards every hook callback into an unbounded channel.
#[derive(Clone)]
pub struct EventHook {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl EventHook {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: TurnEvent) {
        // A closed receiver only means nobody is watching any more.
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl AgencyHook for EventHook {
    async fn on_message(&self, from: &Sender, to: &str, content: &str) -> Result<()> {
        self.emit(TurnEvent::Message {
            from: from.clone(),
            to: to.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn before_tool_call(&self, agent: &str, call: &ToolCall) -> Result<()> {
        self.emit(TurnEvent::ToolCall {
            agent: agent.to_string(),
            call: call.clone(),
        });
        Ok(())
    }

    async fn after_tool_result(&self, agent: &str, result: &ToolResult) -> Result<()> {
        self.emit(TurnEvent::ToolResult {
            agent: agent.to_string(),
            result: result.clone(),
        });
        Ok(())
    }

    async fn on_reply(&self, agent: &str, to: &Sender, content: &str) -> Result<()> {
        self.emit(TurnEvent::Reply {
            agent: agent.to_string(),
            to: to.clone(),
            content: content.to_string(),
        });
        Ok(())
    }
}
