//! Project deviation monitoring MCP server
//!
//! Binds the first free port in its configured range, advertises the bound
//! port through sidecar files, and serves the deviation-analysis tool set
//! over HTTP + WebSocket (and optionally over a stdio MCP transport).

pub mod config;
pub mod dispatch;
pub mod ports;
pub mod state;
pub mod stdio;
pub mod tools;
pub mod watcher;
pub mod web;
