use std::fs;

use regex::{Regex, RegexBuilder};
use serde_json::{Value, json};
use walkdir::WalkDir;

use super::{Capability, ToolEnv, ToolResult, error_result, object, str_arg};
use crate::core::types::Arguments;

/// Case-insensitive regex search over files whose names match a glob.
pub struct SearchInFiles;

impl Capability for SearchInFiles {
    fn name(&self) -> &'static str {
        "search_in_files"
    }

    fn signature(&self) -> &'static str {
        "(pattern: str, path: str = '.', file_pattern: str = '*.py')"
    }

    fn description(&self) -> &'static str {
        "Search for a regex pattern across files."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "minLength": 1},
                "path": {"type": "string"},
                "file_pattern": {"type": "string", "minLength": 1}
            },
            "required": ["pattern"]
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let pattern = str_arg(args, "pattern", "");
        let file_pattern = str_arg(args, "file_pattern", "*.py");
        let root = env.resolve(str_arg(args, "path", "."));
        if !root.is_dir() {
            return error_result(format!("Directory not found: {}", root.display()));
        }
        let line_re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(err) => return error_result(format!("Invalid pattern: {err}")),
        };
        let name_re = match glob_regex(file_pattern) {
            Ok(re) => re,
            Err(err) => return error_result(format!("Invalid file_pattern: {err}")),
        };

        let mut matches = Vec::new();
        for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !name_re.is_match(&name) {
                continue;
            }
            // Unreadable or non-UTF-8 files are skipped.
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            for (idx, line) in content.lines().enumerate() {
                if line_re.is_match(line) {
                    matches.push(json!({
                        "file": relative,
                        "line": idx + 1,
                        "content": line.trim(),
                    }));
                }
            }
        }

        object(json!({
            "pattern": pattern,
            "path": root.display().to_string(),
            "file_pattern": file_pattern,
            "total_matches": matches.len(),
            "matches": matches,
        }))
    }
}

/// Translate a shell glob (`*`, `?`, `[...]`) into an anchored regex.
fn glob_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let mut chars = glob.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' && !class.is_empty() {
                        closed = true;
                        break;
                    }
                    class.push(c);
                }
                if closed {
                    let class = class
                        .strip_prefix('!')
                        .map(|rest| format!("^{rest}"))
                        .unwrap_or(class);
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                } else {
                    out.push_str(&regex::escape(&format!("[{class}")));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}
