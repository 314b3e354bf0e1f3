//! Stable exit codes for coder CLI commands.

/// Command succeeded, or the checked action is allowed.
pub const OK: i32 = 0;
/// Invalid configuration, arguments, or any other failure.
pub const INVALID: i32 = 1;
/// `check-command` / `check-path` found the action forbidden.
pub const FORBIDDEN: i32 = 3;
/// A second Ctrl+C arrived before the first one was handled.
pub const INTERRUPTED: i32 = 130;
