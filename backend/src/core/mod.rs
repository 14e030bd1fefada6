//! Deterministic, pure logic shared by the response engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod control;
pub mod edit_block;
pub mod format;
pub mod goal;
pub mod matching;
pub mod types;
