use reedline::{Completer, Span, Suggestion};
use std::sync::Arc;

use super::CommandRegistry;

/// Prefix-match completer for slash commands only; plain chat text is left
/// to reedline's default (no completion).
pub struct SlashCompleter {
    registry: Arc<CommandRegistry>,
}

impl SlashCompleter {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }
}

impl Completer for SlashCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if !line.starts_with('/') {
            return Vec::new();
        }
        let prefix = &line[1..pos.min(line.len())];
        self.registry
            .list_commands()
            .into_iter()
            .filter(|cmd| cmd.name().starts_with(prefix))
            .map(|cmd| Suggestion {
                value: format!("/{}", cmd.name()),
                description: Some(cmd.description().to_string()),
                style: None,
                extra: None,
                span: Span::new(0, pos),
                append_whitespace: true,
            })
            .collect()
    }
}
