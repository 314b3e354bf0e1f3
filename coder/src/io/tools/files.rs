//! Whole-file capabilities: read, list, write, view, delete.

use std::fs;

use serde_json::{Value, json};

use super::{Capability, ToolEnv, ToolResult, error_result, int_arg, object, path_error, str_arg};
use crate::core::types::Arguments;

pub struct ReadFile;

impl Capability for ReadFile {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn signature(&self) -> &'static str {
        "(filename: str)"
    }

    fn description(&self) -> &'static str {
        "Read the complete contents of a file."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"filename": {"type": "string", "minLength": 1}},
            "required": ["filename"]
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "filename", ""));
        match fs::read_to_string(&path) {
            Ok(content) => object(json!({
                "file_path": path.display().to_string(),
                "content": content,
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                error_result(format!("File not found: {}", path.display()))
            }
            Err(err) => error_result(format!("Could not read {}: {err}", path.display())),
        }
    }
}

pub struct ListFiles;

impl Capability for ListFiles {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn signature(&self) -> &'static str {
        "(path: str = '.')"
    }

    fn description(&self) -> &'static str {
        "List all files and directories in the specified path."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}}
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "path", "."));
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return error_result(format!("Directory not found: {}", path.display()));
            }
            Err(err) => return error_result(format!("Could not list {}: {err}", path.display())),
        };
        let mut files: Vec<(String, &'static str)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let kind = if entry.path().is_file() { "file" } else { "dir" };
                (entry.file_name().to_string_lossy().into_owned(), kind)
            })
            .collect();
        files.sort();
        let files: Vec<Value> = files
            .into_iter()
            .map(|(filename, kind)| json!({"filename": filename, "type": kind}))
            .collect();
        object(json!({"path": path.display().to_string(), "files": files}))
    }
}

pub struct WriteFile;

impl Capability for WriteFile {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn signature(&self) -> &'static str {
        "(path: str, content: str)"
    }

    fn description(&self) -> &'static str {
        "Create a new file or overwrite existing. Use \\n for newlines."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "path", ""));
        let content = str_arg(args, "content", "");
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                return path_error(&path, format!("create directory {}: {err}", parent.display()));
            }
        }
        match fs::write(&path, content) {
            Ok(()) => object(json!({
                "path": path.display().to_string(),
                "action": "written",
                "lines": content.lines().count(),
                "chars": content.chars().count(),
            })),
            Err(err) => path_error(&path, err.to_string()),
        }
    }
}

pub struct ViewFile;

impl Capability for ViewFile {
    fn name(&self) -> &'static str {
        "view_file"
    }

    fn signature(&self) -> &'static str {
        "(filename: str, start_line: int = None, end_line: int = None)"
    }

    fn description(&self) -> &'static str {
        "View a file with line numbers."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": {"type": "string", "minLength": 1},
                "start_line": {"type": ["integer", "null"], "minimum": 1},
                "end_line": {"type": ["integer", "null"], "minimum": 1}
            },
            "required": ["filename"]
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "filename", ""));
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return object(json!({
                    "error": format!("File not found: {}", path.display()),
                    "file_path": path.display().to_string(),
                }));
            }
            Err(err) => return path_error(&path, err.to_string()),
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = int_arg(args, "start_line").map(|n| n.max(1) as usize);
        let end = int_arg(args, "end_line").map(|n| n.max(0) as usize);
        let first = start.unwrap_or(1);
        let last = end.unwrap_or(lines.len()).min(lines.len());
        let view = if first > last {
            String::new()
        } else {
            lines[first - 1..last]
                .iter()
                .enumerate()
                .map(|(i, line)| format!("{}: {line}", i + first))
                .collect::<Vec<_>>()
                .join("\n")
        };
        object(json!({
            "file_path": path.display().to_string(),
            "content": view,
            "total_lines": lines.len(),
            "showing_lines": format!("{}-{}", first, end.unwrap_or(lines.len())),
        }))
    }
}

pub struct DeletePath;

impl Capability for DeletePath {
    fn name(&self) -> &'static str {
        "delete"
    }

    fn signature(&self) -> &'static str {
        "(path: str)"
    }

    fn description(&self) -> &'static str {
        "Delete a file or directory."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string", "minLength": 1}},
            "required": ["path"]
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let path = env.resolve(str_arg(args, "path", ""));
        let display = path.display().to_string();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(_) => {
                return object(json!({
                    "path": display,
                    "action": "not_found",
                    "error": "Does not exist",
                }));
            }
        };
        let (outcome, action) = if metadata.is_dir() {
            (fs::remove_dir_all(&path), "deleted_directory")
        } else {
            (fs::remove_file(&path), "deleted_file")
        };
        match outcome {
            Ok(()) => object(json!({"path": display, "action": action})),
            Err(err) => path_error(&path, err.to_string()),
        }
    }
}
