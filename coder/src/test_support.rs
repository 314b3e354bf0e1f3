//! Test-only collaborators and fixtures for sessions, tools and the gate.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::conversation::Turn;
use crate::core::forbidden::PathContext;
use crate::core::risk::RiskTier;
use crate::core::types::{AgentConfig, Invocation};
use crate::io::completion::CompletionClient;
use crate::io::config::{CoderConfig, ToolConfig};
use crate::io::console::Console;
use crate::io::tools::ToolEnv;
use crate::session::Session;

/// Completion client that replays canned replies in order.
///
/// Errors once the script is exhausted, which lets tests exercise the
/// completion-failure path.
pub struct ScriptedCompletion {
    replies: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<Vec<Turn>>>,
}

impl ScriptedCompletion {
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Conversations seen by each `complete` call.
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.borrow().clone()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete(&self, turns: &[Turn]) -> Result<String> {
        self.requests.borrow_mut().push(turns.to_vec());
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted completion exhausted"))
    }
}

/// Console that answers approval prompts from a script and records output.
///
/// Requests are passed to `run_request` directly, so `read_request` always
/// reports end of input.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    decisions: VecDeque<String>,
    previews: Vec<(RiskTier, String)>,
    notices: Vec<String>,
}

impl ScriptedConsole {
    pub fn new<S: Into<String>>(decisions: Vec<S>) -> Self {
        Self {
            decisions: decisions.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn previews(&self) -> &[(RiskTier, String)] {
        &self.previews
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }
}

impl Console for ScriptedConsole {
    fn read_request(&mut self) -> Result<Option<String>> {
        Ok(None)
    }

    fn show_preview(&mut self, tier: RiskTier, preview: &str) {
        self.previews.push((tier, preview.to_string()));
    }

    fn read_decision(&mut self) -> Result<Option<String>> {
        Ok(self.decisions.pop_front())
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}

/// Build an invocation from a JSON object literal.
pub fn invocation(name: &str, arguments: Value) -> Invocation {
    match arguments {
        Value::Object(map) => Invocation::new(name, map),
        other => panic!("invocation arguments must be an object, got {other}"),
    }
}

/// Scratch workspace for session tests.
///
/// Created under `/tmp` on Unix so that writes pass the containment check
/// even when `TMPDIR` points somewhere protected.
pub fn workspace() -> tempfile::TempDir {
    #[cfg(unix)]
    let dir = tempfile::Builder::new().prefix("coder-").tempdir_in("/tmp");
    #[cfg(not(unix))]
    let dir = tempfile::tempdir();
    dir.expect("create workspace")
}

/// Path anchors with a fixed home so tests do not depend on the environment.
pub fn path_context(root: impl Into<PathBuf>) -> PathContext {
    PathContext {
        cwd: root.into(),
        home: PathBuf::from("/home/tester"),
        temp_dirs: vec![PathBuf::from("/tmp"), PathBuf::from("/var/tmp")],
    }
}

/// Tool environment rooted at `root` with default limits.
pub fn tool_env(root: &Path) -> ToolEnv {
    ToolEnv::new(path_context(root), &ToolConfig::default())
}

/// Session over `root` with default configuration.
pub fn session_in<C: CompletionClient, K: Console>(
    root: &Path,
    completion: C,
    console: K,
    agent: AgentConfig,
) -> Session<C, K> {
    session_with(root, &CoderConfig::default(), completion, console, agent)
}

/// Session over `root` with explicit configuration.
pub fn session_with<C: CompletionClient, K: Console>(
    root: &Path,
    config: &CoderConfig,
    completion: C,
    console: K,
    agent: AgentConfig,
) -> Session<C, K> {
    Session::new(root, config, agent, completion, console)
        .expect("build session")
        .with_path_context(path_context(root))
}
