//! vidgrab - self-hosted media download service
//!
//! This library crate exposes the core functionality for integration testing.

pub mod broadcast;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod postprocess;
pub mod probe;
pub mod reaper;
pub mod server;
pub mod state;
pub mod validate;
