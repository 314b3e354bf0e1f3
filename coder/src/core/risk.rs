//! Risk tiers per capability and human-readable previews of pending actions.

use serde_json::Value;

use crate::core::types::Invocation;

/// How much scrutiny a capability needs before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskTier {
    /// Read-only, no side effects.
    Safe,
    /// File modifications.
    Moderate,
    /// Command execution and deletions.
    High,
}

impl RiskTier {
    pub fn label(self) -> &'static str {
        match self {
            RiskTier::Safe => "SAFE",
            RiskTier::Moderate => "MODERATE",
            RiskTier::High => "HIGH RISK",
        }
    }
}

/// Capabilities that only read the filesystem.
pub const READ_CAPABILITIES: &[&str] = &["read_file", "list_files", "view_file", "search_in_files"];

/// Capabilities whose `path` argument is written to.
pub const WRITE_CAPABILITIES: &[&str] = &[
    "write_file",
    "insert_lines",
    "replace_lines",
    "delete_lines",
    "delete",
];

/// Fixed risk tier lookup. Unknown names are [`RiskTier::High`].
pub fn risk_tier(name: &str) -> RiskTier {
    match name {
        "read_file" | "list_files" | "view_file" | "search_in_files" => RiskTier::Safe,
        "write_file" | "insert_lines" | "replace_lines" | "delete_lines" => RiskTier::Moderate,
        _ => RiskTier::High,
    }
}

fn display_arg(invocation: &Invocation, key: &str, default: &str) -> String {
    match invocation.arguments().get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => default.to_string(),
    }
}

fn prefix_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render the preview shown at the approval prompt.
pub fn format_preview(invocation: &Invocation) -> String {
    let arg = |key: &str, default: &str| display_arg(invocation, key, default);
    match invocation.name() {
        "write_file" => {
            let content = invocation.str_arg("content").unwrap_or_default();
            let lines = if content.is_empty() {
                0
            } else {
                content.matches('\n').count() + 1
            };
            let preview = prefix_chars(content, 200);
            let ellipsis = if preview.len() < content.len() { "..." } else { "" };
            format!(
                "Write to '{}' ({lines} lines):\n{preview}{ellipsis}",
                arg("path", "unknown")
            )
        }
        "run_command" => format!(
            "Execute command in '{}':\n  $ {}",
            arg("working_dir", "."),
            arg("command", "")
        ),
        "delete" => format!("Delete: {}", arg("path", "unknown")),
        "insert_lines" => format!(
            "Insert at line {} in '{}':\n{}",
            arg("line", "1"),
            arg("path", "unknown"),
            prefix_chars(invocation.str_arg("content").unwrap_or_default(), 100)
        ),
        "replace_lines" => format!(
            "Replace lines {}-{} in '{}':\n{}",
            arg("start", "1"),
            arg("end", "1"),
            arg("path", "unknown"),
            prefix_chars(invocation.str_arg("content").unwrap_or_default(), 100)
        ),
        "delete_lines" => format!(
            "Delete lines {}-{} in '{}'",
            arg("start", "1"),
            arg("end", "1"),
            arg("path", "unknown")
        ),
        name => format!(
            "{name}({})",
            Value::Object(invocation.arguments().clone())
        ),
    }
}
