//! Shared config and error types for the Rusty Claw voice agent.

pub mod config;
pub mod error;
