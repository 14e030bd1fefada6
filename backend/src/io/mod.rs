//! Side-effecting adapters used by the engine.

pub mod audit_log;
pub mod boundary;
pub mod command_runner;
pub mod completion;
pub mod config;
pub mod file_agent;
pub mod patch_engine;
pub mod process;
pub mod prompt;
pub mod providers;
