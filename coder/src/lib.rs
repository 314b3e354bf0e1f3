//! Interactive coding agent over a locally hosted language model.
//!
//! The agent turns free-form model replies into capability invocations, keeps
//! them inside the workspace, asks the operator before risky actions and
//! stops the model when it starts repeating itself. The crate keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, safety rules, risk
//!   tiers, repetition detection, observation framing). No I/O.
//! - **[`io`]**: Side-effecting operations (model service, console, process
//!   execution, filesystem capabilities, configuration).
//!
//! Orchestration modules ([`approval`], [`session`], [`step`], [`looping`])
//! coordinate core logic with I/O to implement the chat loop.

pub mod approval;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
