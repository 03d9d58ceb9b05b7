//! Line-oriented console over any async reader/writer pair.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::agency::Sender;
use crate::error::Result;
use crate::hooks::TurnEvent;
use crate::session::Session;

const HELP: &str = "\
Type a message to talk to the entry agent.
  @Name text   address agent `Name` directly
  /agents      list the agents in this agency
  /reset       forget every conversation
  /help        show this help
  /exit        leave (also /quit or end of input)";

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Empty,
    Exit,
    Help,
    Agents,
    Reset,
    Send { to: Option<&'a str>, text: &'a str },
    Unknown(&'a str),
}

fn parse(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if let Some(rest) = line.strip_prefix('@') {
        let (to, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if to.is_empty() {
            return Command::Unknown(line);
        }
        return Command::Send {
            to: Some(to),
            text: text.trim(),
        };
    }
    match line {
        "/exit" | "/quit" => Command::Exit,
        "/help" => Command::Help,
        "/agents" => Command::Agents,
        "/reset" => Command::Reset,
        other if other.starts_with('/') => Command::Unknown(other),
        text => Command::Send { to: None, text },
    }
}

/// Interactive loop. Each line becomes a user turn; hook events produced
/// while the turn runs are rendered as they arrive.
pub struct Console<'a> {
    session: &'a Session,
    events: UnboundedReceiver<TurnEvent>,
}

impl<'a> Console<'a> {
    pub fn new(session: &'a Session, events: UnboundedReceiver<TurnEvent>) -> Self {
        Self { session, events }
    }

    /// Runs until `/exit`, `/quit` or end of input. Turn failures are printed
    /// and the loop keeps going; only I/O errors on the console end it.
    pub async fn run<R, W>(&mut self, mut input: R, output: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = self.session;
        let agency = session.agency();
        write_line(
            output,
            &format!(
                "agency ready: {} (entry: {}). /help for commands.",
                agency
                    .members()
                    .iter()
                    .map(|m| m.name())
                    .collect::<Vec<_>>()
                    .join(", "),
                agency.entry().name()
            ),
        )
        .await?;

        let mut line = String::new();
        loop {
            output.write_all(b"> ").await?;
            output.flush().await?;

            line.clear();
            if input.read_line(&mut line).await? == 0 {
                write_line(output, "").await?;
                break;
            }

            match parse(&line) {
                Command::Empty => {}
                Command::Exit => break,
                Command::Help => write_line(output, HELP).await?,
                Command::Agents => self.list_agents(output).await?,
                Command::Reset => {
                    session.reset().await;
                    write_line(output, "conversations cleared").await?
                }
                Command::Unknown(cmd) => {
                    write_line(output, &format!("unknown command `{cmd}`; try /help")).await?
                }
                Command::Send { to, text } if text.is_empty() => {
                    write_line(
                        output,
                        &format!("nothing to send to {}", to.unwrap_or("the entry agent")),
                    )
                    .await?
                }
                Command::Send { to, text } => {
                    let to = to.unwrap_or_else(|| agency.entry().name());
                    self.turn(to, text, output).await?;
                }
            }
        }

        tracing::info!("console closed");
        Ok(())
    }

    async fn list_agents<W: AsyncWrite + Unpin>(&self, output: &mut W) -> Result<()> {
        let agency = self.session.agency();
        let reachable = agency.user_recipients();
        for member in agency.members() {
            let mut entry = format!("  {}", member.name());
            if !member.description().is_empty() {
                entry.push_str(&format!(" - {}", member.description()));
            }
            if !reachable.contains(&member.name()) {
                entry.push_str(" (internal)");
            }
            write_line(output, &entry).await?;
        }
        Ok(())
    }

    async fn turn<W: AsyncWrite + Unpin>(&mut self, to: &str, text: &str, output: &mut W) -> Result<()> {
        let session = self.session;
        let turn = session.send(Sender::User, to, text);
        tokio::pin!(turn);

        let result = loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => render(&event, output).await?,
                result = &mut turn => break result,
            }
        };
        while let Ok(event) = self.events.try_recv() {
            render(&event, output).await?;
        }

        match result {
            Ok(reply) => write_line(output, &format!("{to}: {reply}")).await,
            Err(err) => {
                tracing::warn!(%to, error = %err, "turn failed");
                write_line(output, &format!("error: {err}")).await
            }
        }
    }
}

async fn render<W: AsyncWrite + Unpin>(event: &TurnEvent, output: &mut W) -> Result<()> {
    let text = match event {
        TurnEvent::Message {
            from: Sender::Agent(from),
            to,
            content,
        } => format!("  [{from} -> {to}] {content}"),
        TurnEvent::Message { .. } => return Ok(()),
        TurnEvent::ToolCall { agent, call } => {
            format!("  [{agent}] calls {} {}", call.name, call.arguments)
        }
        TurnEvent::ToolResult { agent, result } if result.failed => {
            format!("  [{agent}] {} failed: {}", result.name, result.output)
        }
        TurnEvent::ToolResult { agent, result } => {
            format!("  [{agent}] {} -> {}", result.name, result.output)
        }
        TurnEvent::Reply {
            agent,
            to: Sender::Agent(to),
            content,
        } => format!("  [{agent} -> {to}] {content}"),
        TurnEvent::Reply { .. } => return Ok(()),
    };
    write_line(output, &text).await
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
