//! I/O helpers for the agent: configuration, completion service, console,
//! child processes, link resolution, prompt rendering and capabilities.

pub mod completion;
pub mod config;
pub mod console;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod tools;
