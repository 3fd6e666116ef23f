//! Slash commands: a small registry of built-in, non-model commands (`/help`,
//! `/clear`, `/exit`, ...) dispatched before a line is ever sent to the agent.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub mod builtin;
pub mod completer;

/// Result of executing a slash command.
#[derive(Debug, Clone)]
pub enum CommandResult {
    Success(String),
    Error(String),
    Exit,
}

#[async_trait]
pub trait SlashCommand: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn usage(&self) -> &str;
    fn execute(&self, args: Vec<String>) -> Result<CommandResult>;
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, std::sync::Arc<dyn SlashCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: std::sync::Arc<dyn SlashCommand>) {
        self.commands.insert(command.name().to_string(), command);
    }

    pub fn list_commands(&self) -> Vec<&std::sync::Arc<dyn SlashCommand>> {
        self.commands.values().collect()
    }

    /// Splits `/name arg1 arg2` into `(name, args)`. Returns `None` for
    /// anything not starting with `/`.
    pub fn parse_command_line(input: &str) -> Option<(&str, Vec<String>)> {
        let input = input.trim();
        if !input.starts_with('/') {
            return None;
        }
        let mut parts = input[1..].split_whitespace();
        let name = parts.next()?;
        Some((name, parts.map(String::from).collect()))
    }

    pub fn execute(&self, name: &str, args: Vec<String>) -> Result<CommandResult> {
        match self.commands.get(name) {
            Some(cmd) => cmd.execute(args),
            None => Ok(CommandResult::Error(format!("unknown command: /{name}. Type '/help' to see available commands."))),
        }
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }
}
