//! Context builder for assembling agent prompts

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;

use waypoint_provider::Message;

/// Builds the system prompt that opens every session
pub struct ContextBuilder {
    name: String,
    workspace: Option<PathBuf>,
}

impl ContextBuilder {
    /// Optional file with extra instructions, read from the workspace
    const INSTRUCTIONS_FILE: &'static str = "INSTRUCTIONS.md";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace: None,
        }
    }

    /// Look for extra instructions in `workspace`
    pub fn with_workspace(mut self, workspace: impl AsRef<Path>) -> Self {
        self.workspace = Some(workspace.as_ref().to_path_buf());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the system prompt
    pub async fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.identity()];

        if let Some(extra) = self.load_instructions().await {
            parts.push(format!("## Instructions\n\n{}", extra.trim()));
        }

        parts.join("\n\n")
    }

    fn identity(&self) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");

        format!(
            r#"# {}

You are {}, an AI assistant with access to tools.

## Current Time
{}

When a user makes a request and you can answer sufficiently on your own or from context and message history, answer with this information.
If you can not answer and you need further information, determine which tools would be helpful and call them.
If nothing applies, please say so."#,
            self.name, self.name, now
        )
    }

    async fn load_instructions(&self) -> Option<String> {
        let path = self.workspace.as_ref()?.join(Self::INSTRUCTIONS_FILE);
        if !path.exists() {
            return None;
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => Some(content),
            Ok(_) => None,
            Err(e) => {
                debug!("Failed to read {:?}: {}", path, e);
                None
            }
        }
    }

    /// Opening conversation: just the system prompt
    pub async fn build_messages(&self) -> Vec<Message> {
        vec![Message::system(self.build_system_prompt().await)]
    }
}
