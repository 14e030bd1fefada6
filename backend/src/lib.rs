//! Response engine behind the awesh shell.
//!
//! The frontend forwards anything that is not a plain shell command to this
//! process over a Unix socket. Each request is sent to a model; the completion
//! is classified and resolved into an effect: commands are tried until one
//! succeeds, file edits are applied with backups, multi-step requests run as a
//! bounded goal loop, and anything else is passed back as text.
//!
//! - **[`core`]**: Pure, deterministic logic (classification, patch parsing,
//!   matching, goal state, reply formatting). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, subprocesses, completion
//!   providers, file edits, file references, prompts).
//!
//! Orchestration modules ([`orchestrator`], [`goal_loop`], [`session`],
//! [`server`]) coordinate the two.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod goal_loop;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
