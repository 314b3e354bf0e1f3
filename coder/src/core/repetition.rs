//! Detection of repetitive action and error cycles.

use std::collections::VecDeque;
use std::fmt;

use serde_json::Value;

use crate::core::types::Arguments;

pub const ACTION_HISTORY_CAPACITY: usize = 6;
pub const ERROR_HISTORY_CAPACITY: usize = 5;

/// FIFO buffer that evicts its oldest entry once `capacity` is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl BoundedHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entry `n` places from the newest (0 = newest).
    fn back(&self, n: usize) -> Option<&str> {
        let len = self.entries.len();
        if n >= len {
            return None;
        }
        self.entries.get(len - 1 - n).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// Identity of an action for repetition purposes.
pub fn action_signature(name: &str, args: &Arguments) -> String {
    let arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();
    match name {
        "write_file" => format!("write:{}", arg("path")),
        "run_command" => format!("run:{}", take_chars(arg("command"), 50)),
        "delete" => format!("delete:{}", arg("path")),
        "view_file" => format!("view:{}", arg("filename")),
        _ => {
            let rendered = Value::Object(args.clone()).to_string();
            format!("{name}:{}", take_chars(&rendered, 30))
        }
    }
}

fn take_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A recognised repetitive pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleKind {
    RepeatedError,
    RepeatedAction { signature: String },
    TwoStepCycle { first: String, second: String },
    ThreeStepCycle,
    WriteDeleteCycle,
    RepeatedNotFound,
}

impl CycleKind {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleKind::RepeatedError => write!(
                f,
                "STOP. Same error twice in a row. Read the error message carefully - it tells you the exact line number to fix."
            ),
            CycleKind::RepeatedAction { signature } => write!(
                f,
                "STOP. You've done the same action 3 times: {signature}. Move on to the next step."
            ),
            CycleKind::TwoStepCycle { first, second } => write!(
                f,
                "STOP. You're in a loop: {first} -> {second} -> repeat. Break the cycle and continue with the actual task."
            ),
            CycleKind::ThreeStepCycle => write!(
                f,
                "STOP. You're repeating a 3-step cycle. The task files are created - move on or report completion."
            ),
            CycleKind::WriteDeleteCycle => write!(
                f,
                "STOP. Do not delete files you just created. Continue building the project."
            ),
            CycleKind::RepeatedNotFound => write!(
                f,
                "STOP. You keep looking for a file that doesn't exist at that path. Use list_files('.') to see where the file actually is - it may be in the current directory, not the project subfolder."
            ),
        }
    }
}

/// Inspect both histories and report the first matching cycle.
///
/// Fewer than three recorded actions never yields a cycle.
pub fn detect_cycle(actions: &BoundedHistory, errors: &BoundedHistory) -> Option<CycleKind> {
    if actions.len() < 3 {
        return None;
    }

    if let (Some(last), Some(prev)) = (errors.back(0), errors.back(1)) {
        if last == prev {
            return Some(CycleKind::RepeatedError);
        }
    }

    let recent: Vec<&str> = actions
        .iter()
        .skip(actions.len().saturating_sub(6))
        .collect();
    let at = |n: usize| recent[recent.len() - 1 - n];

    if at(0) == at(1) && at(1) == at(2) {
        return Some(CycleKind::RepeatedAction {
            signature: at(0).to_string(),
        });
    }

    if recent.len() >= 4 && at(0) == at(2) && at(1) == at(3) {
        return Some(CycleKind::TwoStepCycle {
            first: at(1).to_string(),
            second: at(0).to_string(),
        });
    }

    if recent.len() >= 6 && at(0) == at(3) && at(1) == at(4) && at(2) == at(5) {
        return Some(CycleKind::ThreeStepCycle);
    }

    let writes_before_delete = recent
        .iter()
        .rposition(|a| a.starts_with("delete:"))
        .map(|idx| recent[..idx].iter().filter(|a| a.starts_with("write:")).count());
    if writes_before_delete.is_some_and(|writes| writes >= 2) {
        return Some(CycleKind::WriteDeleteCycle);
    }

    let not_found = errors
        .iter()
        .skip(errors.len().saturating_sub(3))
        .filter(|e| e.to_lowercase().contains("not found"))
        .count();
    if not_found >= 2 {
        return Some(CycleKind::RepeatedNotFound);
    }

    None
}
