//! Capability collaborators and the name-keyed registry.
//!
//! Every capability takes a JSON argument mapping and returns a JSON object.
//! Failures never escape as `Err`: they are reported in the result's `error`
//! field so the model can read them and react.

mod command;
mod files;
mod lines;
mod search;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use crate::core::forbidden::PathContext;
use crate::core::types::{Arguments, Invocation};
use crate::io::config::ToolConfig;

pub use command::RunCommand;
pub use files::{DeletePath, ListFiles, ReadFile, ViewFile, WriteFile};
pub use lines::{DeleteLines, InsertLines, ReplaceLines};
pub use search::SearchInFiles;

/// JSON object returned by a capability.
pub type ToolResult = Map<String, Value>;

/// Environment shared by all capabilities of a session.
#[derive(Debug, Clone)]
pub struct ToolEnv {
    /// Resolves model-supplied paths (relative to the session root).
    pub paths: PathContext,
    pub command_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ToolEnv {
    pub fn new(paths: PathContext, config: &ToolConfig) -> Self {
        Self {
            paths,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.paths.resolve(path)
    }
}

/// A named operation the model can ask for.
pub trait Capability {
    fn name(&self) -> &'static str;
    /// Parameter list shown to the model, e.g. `(path, content)`.
    fn signature(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema (draft 2020-12) for the argument mapping.
    fn schema(&self) -> Value;
    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult;
}

struct Entry {
    capability: Box<dyn Capability>,
    validator: Validator,
}

/// Capabilities in declaration order, with compiled argument schemas.
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// The standard capability set, in the order shown to the model.
    pub fn standard() -> Result<Self> {
        Self::from_capabilities(vec![
            Box::new(ReadFile),
            Box::new(ListFiles),
            Box::new(WriteFile),
            Box::new(InsertLines),
            Box::new(ReplaceLines),
            Box::new(DeleteLines),
            Box::new(RunCommand),
            Box::new(ViewFile),
            Box::new(SearchInFiles),
            Box::new(DeletePath),
        ])
    }

    pub fn from_capabilities(capabilities: Vec<Box<dyn Capability>>) -> Result<Self> {
        let mut entries: Vec<Entry> = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            if entries
                .iter()
                .any(|e| e.capability.name() == capability.name())
            {
                return Err(anyhow!("duplicate capability {}", capability.name()));
            }
            let validator = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&capability.schema())
                .map_err(|err| anyhow!("invalid schema for {}: {}", capability.name(), err))?;
            entries.push(Entry {
                capability,
                validator,
            });
        }
        Ok(Self { entries })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.capability.name()).collect()
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &dyn Capability> {
        self.entries.iter().map(|e| e.capability.as_ref())
    }

    fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.capability.name() == name)
    }

    /// Validate arguments against the capability schema, then run it.
    #[instrument(skip_all, fields(capability = invocation.name()))]
    pub fn execute(&self, invocation: &Invocation, env: &ToolEnv) -> ToolResult {
        let Some(entry) = self.get(invocation.name()) else {
            warn!("no handler registered");
            return error_result(format!("No handler for tool: {}", invocation.name()));
        };
        let instance = Value::Object(invocation.arguments().clone());
        let violations: Vec<String> = entry
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            debug!(violations = violations.len(), "argument schema violations");
            return error_result(format!(
                "Invalid arguments for {}: {}. Expected {}{}",
                invocation.name(),
                violations.join("; "),
                invocation.name(),
                entry.capability.signature()
            ));
        }
        let result = entry.capability.invoke(invocation.arguments(), env);
        debug!(failed = result.contains_key("error"), "capability finished");
        result
    }
}

/// A result carrying only an `error` field.
pub fn error_result(message: impl Into<String>) -> ToolResult {
    let mut map = Map::new();
    map.insert("error".to_string(), Value::String(message.into()));
    map
}

/// Turn a `json!({...})` literal into a result map.
fn object(value: Value) -> ToolResult {
    match value {
        Value::Object(map) => map,
        other => error_result(format!("internal: capability produced non-object {other}")),
    }
}

/// Error result that keeps the resolved path alongside the message.
fn path_error(path: &std::path::Path, message: impl Into<String>) -> ToolResult {
    object(json!({
        "path": path.display().to_string(),
        "action": "error",
        "error": message.into(),
    }))
}

fn str_arg<'a>(args: &'a Arguments, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn int_arg(args: &Arguments, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{invocation, tool_env};

    #[test]
    fn standard_registry_keeps_declaration_order() {
        let registry = Registry::standard().expect("registry");
        assert_eq!(
            registry.names(),
            vec![
                "read_file",
                "list_files",
                "write_file",
                "insert_lines",
                "replace_lines",
                "delete_lines",
                "run_command",
                "view_file",
                "search_in_files",
                "delete",
            ]
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Registry::from_capabilities(vec![Box::new(ReadFile), Box::new(ReadFile)])
            .err()
            .expect("duplicate must fail");
        assert!(err.to_string().contains("duplicate capability read_file"));
    }

    #[test]
    fn schema_violations_are_reported_in_error_field() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::standard().expect("registry");
        let result = registry.execute(
            &invocation("write_file", json!({"path": "a.py"})),
            &tool_env(temp.path()),
        );
        let error = result["error"].as_str().expect("error");
        assert!(error.starts_with("Invalid arguments for write_file"));
        assert!(error.contains("content"));
        assert!(!temp.path().join("a.py").exists());
    }

    #[test]
    fn wrongly_typed_line_numbers_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::standard().expect("registry");
        let result = registry.execute(
            &invocation(
                "delete_lines",
                json!({"path": "a.py", "start": "1", "end": 2}),
            ),
            &tool_env(temp.path()),
        );
        assert!(result.contains_key("error"));
    }
}
