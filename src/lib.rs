//! devgate - development front door
//!
//! Routes API, health-check and WebSocket traffic from the dev server port
//! to locally running backend processes.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
