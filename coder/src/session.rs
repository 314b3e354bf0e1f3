//! Session state shared by every request of one interactive run.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::conversation::Conversation;
use crate::core::forbidden::PathContext;
use crate::core::observation::truncate_chars;
use crate::core::repetition::{ACTION_HISTORY_CAPACITY, BoundedHistory, ERROR_HISTORY_CAPACITY};
use crate::core::types::AgentConfig;
use crate::io::completion::CompletionClient;
use crate::io::config::{CoderConfig, LoopConfig};
use crate::io::console::Console;
use crate::io::prompt::render_system_prompt;
use crate::io::tools::{Registry, ToolEnv};

/// Per-request bookkeeping, reset whenever a new request starts.
#[derive(Debug, Clone)]
pub struct RequestState {
    pub request: String,
    pub actions: BoundedHistory,
    pub errors: BoundedHistory,
    pub no_invocation_streak: u32,
}

impl RequestState {
    fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            actions: BoundedHistory::new(ACTION_HISTORY_CAPACITY),
            errors: BoundedHistory::new(ERROR_HISTORY_CAPACITY),
            no_invocation_streak: 0,
        }
    }
}

/// An interactive agent session over one workspace root.
///
/// Owns the conversation, the capability registry and the collaborators.
/// The agent configuration is owned here and only the approval gate changes it.
pub struct Session<C, K> {
    pub(crate) completion: C,
    pub(crate) console: K,
    pub(crate) registry: Registry,
    pub(crate) tools: ToolEnv,
    pub(crate) agent: AgentConfig,
    pub(crate) limits: LoopConfig,
    pub(crate) conversation: Conversation,
    pub(crate) created_files: Vec<String>,
    pub(crate) state: RequestState,
}

impl<C: CompletionClient, K: Console> Session<C, K> {
    pub fn new(
        root: &Path,
        config: &CoderConfig,
        agent: AgentConfig,
        completion: C,
        console: K,
    ) -> Result<Self> {
        let registry = Registry::standard().context("build capability registry")?;
        let system_prompt = render_system_prompt(&registry, root)?;
        let tools = ToolEnv::new(PathContext::for_root(root), &config.tools);
        debug!(root = %root.display(), capabilities = registry.names().len(), "session ready");
        Ok(Self {
            completion,
            console,
            registry,
            tools,
            agent,
            limits: config.agent.clone(),
            conversation: Conversation::new(system_prompt),
            created_files: Vec::new(),
            state: RequestState::new(""),
        })
    }

    /// Replace the path anchors (tests pin `home` and temp directories).
    pub fn with_path_context(mut self, paths: PathContext) -> Self {
        self.tools.paths = paths;
        self
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.agent
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn created_files(&self) -> &[String] {
        &self.created_files
    }

    pub fn limits(&self) -> &LoopConfig {
        &self.limits
    }

    pub fn console_mut(&mut self) -> &mut K {
        &mut self.console
    }

    pub fn into_console(self) -> K {
        self.console
    }

    /// Append the request and reset per-request bookkeeping.
    pub(crate) fn begin_request(&mut self, request: &str) {
        self.conversation.push_user(request);
        self.state = RequestState::new(request);
    }

    pub(crate) fn record_created(&mut self, path: &str) {
        if !self.created_files.iter().any(|p| p == path) {
            self.created_files.push(path.to_string());
        }
    }

    fn progress_summary(&self) -> String {
        let files = if self.created_files.is_empty() {
            "none yet".to_string()
        } else {
            self.created_files.join(", ")
        };
        let mut summary = format!("[Previous work: Created files: {files}");
        if !self.state.request.is_empty() {
            summary.push_str(&format!(
                ". Current request: {}",
                truncate_chars(&self.state.request, 200)
            ));
        }
        summary.push(']');
        summary
    }

    /// Compact the conversation once it exceeds the configured ceiling.
    pub(crate) fn compact_if_needed(&mut self) -> bool {
        if self.conversation.len() <= self.limits.max_turns {
            return false;
        }
        let summary = self.progress_summary();
        let compacted = self.conversation.compact(
            self.limits.max_turns,
            self.limits.keep_recent_turns,
            summary,
        );
        if compacted {
            debug!(turns = self.conversation.len(), "conversation compacted");
        }
        compacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Role;
    use crate::test_support::{ScriptedCompletion, ScriptedConsole, session_in, workspace};

    #[test]
    fn new_session_starts_with_rendered_system_prompt() {
        let temp = workspace();
        let session = session_in(
            temp.path(),
            ScriptedCompletion::new(Vec::<&str>::new()),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        let turns = session.conversation().turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[0].content.contains("write_file(path: str, content: str)"));
    }

    #[test]
    fn compaction_summarizes_created_files_and_request() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(Vec::<&str>::new()),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("build a snake game");
        session.record_created("a.py");
        session.record_created("a.py");
        for i in 0..45 {
            session.conversation.push_assistant(format!("r{i}"));
        }
        assert!(session.compact_if_needed());
        let turns = session.conversation().turns();
        assert_eq!(turns.len(), 2 + session.limits().keep_recent_turns);
        assert_eq!(
            turns[1].content,
            "[Previous work: Created files: a.py. Current request: build a snake game]"
        );
        assert!(!session.compact_if_needed());
    }
}
