use crate::commands::{CommandResult, SlashCommand};
use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;

pub struct HelpCommand;

#[async_trait]
impl SlashCommand for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "Show available slash commands"
    }

    fn usage(&self) -> &str {
        ""
    }

    fn execute(&self, _args: Vec<String>) -> Result<CommandResult> {
        let mut output = String::new();
        output.push_str(&format!("{}\n\n", "Built-in commands:".bold()));

        let builtin_commands = [
            ("/help", "Show available slash commands"),
            ("/clear", "Clear the screen"),
            ("/exit", "Exit the application"),
        ];

        for (cmd, desc) in builtin_commands {
            output.push_str(&format!("  {}\n    {}\n\n", cmd.cyan(), desc));
        }

        output.push_str(&format!("{}\n", "Anything else is sent to the agent as a chat message.".dimmed()));
        Ok(CommandResult::Success(output))
    }
}
