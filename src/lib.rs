//! Listening-socket audit: read the host's socket and process tables, join
//! them, classify each listener and score its exposure.

pub mod cli;
pub mod config;
pub mod core;
pub mod correlate;
pub mod engine;
pub mod error;
pub mod exit;
pub mod platform;
pub mod processes;
pub mod rules;
pub mod sockets;
pub mod ui;
