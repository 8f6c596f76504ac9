//! Lantern server: HTTP API, WebSocket subscribers and configuration

pub mod api;
pub mod config;
pub mod ws;
