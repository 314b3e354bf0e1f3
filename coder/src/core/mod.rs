//! Deterministic, pure logic shared by the agent core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod conversation;
pub mod extract;
pub mod forbidden;
pub mod literal;
pub mod observation;
pub mod repetition;
pub mod risk;
pub mod types;
