//! Shared primitives for the gate: errors, config, git plumbing, change
//! extraction, typed stores, the report, and the orchestrator.

pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod output;
pub mod patterns;
pub mod records;
pub mod report;
pub mod store;
pub mod time;
pub mod validate;
