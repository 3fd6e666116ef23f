//! Interactive REPL: a line editor in front of one leased [`Agent`], with a
//! background task draining the Progress channel so assistant text streams
//! to the terminal as it is produced rather than only after `chat()` returns.

use crate::commands::builtin::{ClearCommand, ExitCommand, HelpCommand};
use crate::commands::completer::SlashCompleter;
use crate::commands::{CommandRegistry, CommandResult};
use atrium_agent::prelude::*;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A bare `:: ` prompt, no left/right segments or history search styling
/// beyond what the trait requires.
struct AtriumPrompt;

impl Prompt for AtriumPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed(":: ")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(&self, search: PromptHistorySearch) -> Cow<str> {
        match search.status {
            PromptHistorySearchStatus::Passing => Cow::Borrowed("(search) "),
            PromptHistorySearchStatus::Failing => Cow::Borrowed("(failing search) "),
        }
    }
}

fn registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(HelpCommand));
    registry.register(Arc::new(ClearCommand));
    registry.register(Arc::new(ExitCommand));
    registry
}

/// Prints Progress-channel events until the receiver closes (i.e. until
/// `event_bus`/the agent are dropped).
fn spawn_progress_printer(event_bus: Arc<EventBus>, agent_id: String) {
    tokio::spawn(async move {
        let Ok((backlog, mut receiver)) = event_bus.subscribe(&agent_id, Channel::Progress, None).await else {
            return;
        };
        for timeline in backlog {
            print_progress_event(&timeline.event);
        }
        while let Some(timeline) = receiver.recv().await {
            print_progress_event(&timeline.event);
        }
    });
}

fn print_progress_event(event: &DomainEvent) {
    match event {
        DomainEvent::TextDelta { text } => {
            print!("{text}");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
        DomainEvent::ToolStart { name, .. } => {
            println!("\n{} {}", "tool:".dimmed(), name.cyan());
        }
        DomainEvent::ToolEnd { success: false, error_summary, .. } => {
            println!("{} {}", "tool failed:".red(), error_summary.clone().unwrap_or_default());
        }
        DomainEvent::Done { .. } => {
            println!();
        }
        DomainEvent::Error { message } => {
            println!("{} {message}", "error:".red().bold());
        }
        _ => {}
    }
}

pub async fn run_interactive(lease: Lease, event_bus: Arc<EventBus>) -> anyhow::Result<()> {
    let agent_id = lease.agent_id().to_string();
    spawn_progress_printer(Arc::clone(&event_bus), agent_id);

    let commands = Arc::new(registry());
    let mut line_editor = Reedline::create().with_completer(Box::new(SlashCompleter::new(Arc::clone(&commands))));
    let prompt = AtriumPrompt;

    loop {
        let signal = line_editor.read_line(&prompt)?;
        let line = match signal {
            Signal::Success(line) => line,
            Signal::CtrlC | Signal::CtrlD => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((name, args)) = CommandRegistry::parse_command_line(line) {
            match commands.execute(name, args) {
                Ok(CommandResult::Success(output)) => {
                    if !output.is_empty() {
                        println!("{output}");
                    }
                }
                Ok(CommandResult::Error(message)) => println!("{} {message}", "error:".red()),
                Ok(CommandResult::Exit) => break,
                Err(err) => println!("{} {err}", "error:".red()),
            }
            continue;
        }

        let mut agent = lease.agent().lock().await;
        let result = agent.chat(ChatMessage::user(line), CancellationToken::new()).await;
        drop(agent);
        if let Err(err) = result {
            println!("{} {err}", "error:".red());
        }
    }

    Ok(())
}

pub async fn run_one_shot(lease: Lease, prompt: String) -> anyhow::Result<()> {
    let mut agent = lease.agent().lock().await;
    agent.chat(ChatMessage::user(prompt), CancellationToken::new()).await?;
    drop(agent);
    Ok(())
}
