//! Line-range edits on existing files (1-indexed, inclusive ranges).

use std::fs;
use std::path::Path;

use serde_json::{Value, json};

use super::{Capability, ToolEnv, ToolResult, int_arg, object, path_error, str_arg};
use crate::core::types::Arguments;

/// Split into lines that each keep their terminator.
fn split_keep_ends(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

/// Content lines, each terminated by `\n`.
fn terminated_lines(content: &str) -> Vec<String> {
    content.lines().map(|line| format!("{line}\n")).collect()
}

fn load_lines(path: &Path, missing: &str) -> Result<Vec<String>, ToolResult> {
    if !path.exists() {
        return Err(path_error(path, missing));
    }
    fs::read_to_string(path)
        .map(|text| split_keep_ends(&text))
        .map_err(|err| path_error(path, err.to_string()))
}

fn store_lines(path: &Path, lines: &[String]) -> Result<(), ToolResult> {
    fs::write(path, lines.concat()).map_err(|err| path_error(path, err.to_string()))
}

/// Validated `(start, end)` range, or an error result.
fn line_range(path: &Path, args: &Arguments) -> Result<(usize, usize), ToolResult> {
    let start = int_arg(args, "start").unwrap_or(1);
    let end = int_arg(args, "end").unwrap_or(1);
    if start < 1 || end < 1 {
        return Err(path_error(path, "Line numbers must be >= 1"));
    }
    if start > end {
        return Err(path_error(
            path,
            format!("start ({start}) must be <= end ({end})"),
        ));
    }
    Ok((start as usize, end as usize))
}

fn range_schema(with_content: bool) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "minLength": 1},
            "start": {"type": "integer"},
            "end": {"type": "integer"}
        },
        "required": ["path", "start", "end"]
    });
    if with_content {
        schema["properties"]["content"] = json!({"type": "string"});
        schema["required"] = json!(["path", "start", "end", "content"]);
    }
    schema
}

pub struct InsertLines;

impl Capability for InsertLines {
    fn name(&self) -> &'static str {
        "insert_lines"
    }

    fn signature(&self) -> &'static str {
        "(path: str, line: int, content: str)"
    }

    fn description(&self) -> &'static str {
        "Insert lines BEFORE the specified line number (1-indexed)."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "line": {"type": "integer"},
                "content": {"type": "string"}
            },
            "required": ["path", "line", "content"]
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "path", ""));
        let mut lines = match load_lines(&path, "File does not exist. Use write_file first.") {
            Ok(lines) => lines,
            Err(result) => return result,
        };
        if let Some(last) = lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
        let line = int_arg(args, "line").unwrap_or(1);
        let new_lines = terminated_lines(str_arg(args, "content", ""));
        let inserted = new_lines.len();
        let pos = usize::try_from(line.saturating_sub(1))
            .unwrap_or(0)
            .min(lines.len());
        lines.splice(pos..pos, new_lines);
        if let Err(result) = store_lines(&path, &lines) {
            return result;
        }
        object(json!({
            "path": path.display().to_string(),
            "action": "inserted",
            "at_line": line,
            "inserted_lines": inserted,
            "total_lines": lines.len(),
        }))
    }
}

pub struct ReplaceLines;

impl Capability for ReplaceLines {
    fn name(&self) -> &'static str {
        "replace_lines"
    }

    fn signature(&self) -> &'static str {
        "(path: str, start: int, end: int, content: str)"
    }

    fn description(&self) -> &'static str {
        "Replace lines start-end (inclusive, 1-indexed) with new content."
    }

    fn schema(&self) -> Value {
        range_schema(true)
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "path", ""));
        let result = load_lines(&path, "File does not exist.").and_then(|mut lines| {
            let (start, end) = line_range(&path, args)?;
            let new_lines = terminated_lines(str_arg(args, "content", ""));
            let new_count = new_lines.len();
            let from = (start - 1).min(lines.len());
            let to = end.min(lines.len());
            lines.splice(from..to, new_lines);
            store_lines(&path, &lines)?;
            Ok(object(json!({
                "path": path.display().to_string(),
                "action": "replaced",
                "replaced_lines": format!("{start}-{end}"),
                "new_line_count": new_count,
                "total_lines": lines.len(),
            })))
        });
        result.unwrap_or_else(|err| err)
    }
}

pub struct DeleteLines;

impl Capability for DeleteLines {
    fn name(&self) -> &'static str {
        "delete_lines"
    }

    fn signature(&self) -> &'static str {
        "(path: str, start: int, end: int)"
    }

    fn description(&self) -> &'static str {
        "Delete lines start-end (inclusive, 1-indexed)."
    }

    fn schema(&self) -> Value {
        range_schema(false)
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "path", ""));
        let result = load_lines(&path, "File does not exist").and_then(|mut lines| {
            let (start, end) = line_range(&path, args)?;
            let from = (start - 1).min(lines.len());
            let to = end.min(lines.len());
            let removed = lines.drain(from..to).count();
            store_lines(&path, &lines)?;
            Ok(object(json!({
                "path": path.display().to_string(),
                "action": "deleted",
                "deleted_lines": format!("{start}-{end}"),
                "deleted_count": removed,
                "remaining_lines": lines.len(),
            })))
        });
        result.unwrap_or_else(|err| err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tool_env;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => panic!("object"),
        }
    }

    fn setup(content: &str) -> (tempfile::TempDir, ToolEnv) {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("f.py"), content).expect("write");
        let env = tool_env(temp.path());
        (temp, env)
    }

    fn read(temp: &tempfile::TempDir) -> String {
        fs::read_to_string(temp.path().join("f.py")).expect("read")
    }

    #[test]
    fn insert_goes_before_line_and_terminates_last_line() {
        let (temp, env) = setup("a\nc");
        let result = InsertLines.invoke(
            &args(json!({"path": "f.py", "line": 2, "content": "b"})),
            &env,
        );
        assert_eq!(result["action"], "inserted");
        assert_eq!(result["total_lines"], 3);
        assert_eq!(read(&temp), "a\nb\nc\n");
    }

    #[test]
    fn insert_past_end_appends() {
        let (temp, env) = setup("a\n");
        InsertLines.invoke(&args(json!({"path": "f.py", "line": 99, "content": "z"})), &env);
        assert_eq!(read(&temp), "a\nz\n");
    }

    #[test]
    fn insert_into_missing_file_points_to_write_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = InsertLines.invoke(
            &args(json!({"path": "nope.py", "line": 1, "content": "x"})),
            &tool_env(temp.path()),
        );
        assert!(result["error"].as_str().expect("error").contains("write_file"));
    }

    #[test]
    fn replace_swaps_inclusive_range() {
        let (temp, env) = setup("1\n2\n3\n4\n");
        let result = ReplaceLines.invoke(
            &args(json!({"path": "f.py", "start": 2, "end": 3, "content": "two\nthree\nextra"})),
            &env,
        );
        assert_eq!(result["replaced_lines"], "2-3");
        assert_eq!(result["new_line_count"], 3);
        assert_eq!(read(&temp), "1\ntwo\nthree\nextra\n4\n");
    }

    #[test]
    fn replace_rejects_inverted_range() {
        let (temp, env) = setup("1\n2\n");
        let result = ReplaceLines.invoke(
            &args(json!({"path": "f.py", "start": 2, "end": 1, "content": "x"})),
            &env,
        );
        assert_eq!(result["error"], "start (2) must be <= end (1)");
        assert_eq!(read(&temp), "1\n2\n");
    }

    #[test]
    fn delete_removes_range_and_counts() {
        let (temp, env) = setup("1\n2\n3\n");
        let result = DeleteLines.invoke(&args(json!({"path": "f.py", "start": 1, "end": 2})), &env);
        assert_eq!(result["deleted_count"], 2);
        assert_eq!(result["remaining_lines"], 1);
        assert_eq!(read(&temp), "3\n");

        let result = DeleteLines.invoke(&args(json!({"path": "f.py", "start": 0, "end": 1})), &env);
        assert_eq!(result["error"], "Line numbers must be >= 1");
    }
}
