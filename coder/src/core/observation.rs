//! Turning capability results into conversation feedback.
//!
//! Results are JSON objects; a present `error` field marks a failed call.
//! Everything here is pure so the framing rules can be tested in isolation.

use serde_json::{Map, Value};

pub const NOT_FOUND_HINT: &str = "File not found. Use list_files('.') to check the current directory - the file may have been created there instead of in the project folder.";

const SILENT_SUCCESS_NOTE: &str = "SUCCESS: Program ran successfully (returncode=0). Interactive programs like games don't produce console output. Task complete.";

const TRUNCATION_MARKER: &str = "...(truncated)";

type ResultMap = Map<String, Value>;

fn text<'a>(result: &'a ResultMap, key: &str) -> &'a str {
    result.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// The `error` field rendered as text, if present and non-null.
pub fn error_text(result: &ResultMap) -> Option<String> {
    match result.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn return_code(result: &ResultMap) -> i64 {
    result.get("returncode").and_then(Value::as_i64).unwrap_or(0)
}

/// Entries for the error history produced by one result.
///
/// A failed call records its `error`; a command that exited non-zero records
/// its (trimmed) stderr when there is any.
pub fn failure_records(name: &str, result: &ResultMap) -> Vec<String> {
    let mut records = Vec::new();
    if let Some(err) = error_text(result) {
        records.push(err);
    }
    if name == "run_command" && return_code(result) != 0 {
        let stderr = text(result, "stderr").trim();
        if !stderr.is_empty() {
            records.push(stderr.to_string());
        }
    }
    records
}

/// Keep the first `limit` characters and mark the cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..idx]),
        None => text.to_string(),
    }
}

/// Render the user turn that reports a result back to the model.
pub fn render_observation(name: &str, result: &ResultMap, char_limit: usize) -> String {
    let json = Value::Object(result.clone()).to_string();
    let body = if name == "run_command" && error_text(result).is_none() {
        let stdout = text(result, "stdout").trim();
        let stderr = text(result, "stderr").trim();
        if return_code(result) != 0 {
            format!("ERROR:\n{stderr}\n\nFull result: {json}")
        } else if stdout.is_empty() && stderr.is_empty() {
            format!("{json}\n\n{SILENT_SUCCESS_NOTE}")
        } else {
            json
        }
    } else {
        json
    };
    let mut rendered = format!("Result: {}", truncate_chars(&body, char_limit));
    if error_text(result).is_some_and(|e| e.to_lowercase().contains("not found")) {
        rendered.push_str("\n\nHINT: ");
        rendered.push_str(NOT_FOUND_HINT);
    }
    rendered
}

/// One-line description of a result for the operator.
pub fn summarize(name: &str, result: &ResultMap) -> String {
    if let Some(err) = error_text(result) {
        return format!("✗ Error: {err}");
    }
    let field = |key: &str| match result.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "?".to_string(),
    };
    match name {
        "run_command" => {
            let rc = return_code(result);
            let mark = if rc == 0 { "✓" } else { "✗" };
            let mut line = format!("{mark} Command: {} (exit {rc})", field("command"));
            let stdout = text(result, "stdout").trim();
            let stderr = text(result, "stderr").trim();
            if !stdout.is_empty() {
                line.push_str(&format!("\n    out: {}", truncate_chars(stdout, 400)));
            }
            if !stderr.is_empty() {
                line.push_str(&format!("\n    err: {}", truncate_chars(stderr, 400)));
            }
            if stdout.is_empty() && stderr.is_empty() {
                line.push_str("\n    (no output)");
            }
            line
        }
        "write_file" => format!("✓ Wrote {} lines to {}", field("lines"), field("path")),
        "insert_lines" => format!(
            "✓ Inserted {} lines at line {}",
            field("inserted_lines"),
            field("at_line")
        ),
        "replace_lines" => format!("✓ Replaced lines {}", field("replaced_lines")),
        "delete_lines" => format!("✓ Deleted lines {}", field("deleted_lines")),
        "view_file" => format!("✓ Viewing lines {}", field("showing_lines")),
        "list_files" => {
            let count = result
                .get("files")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            format!("✓ Listed {count} items")
        }
        other => format!("✓ {other} completed"),
    }
}
