//! HTTP front end
//!
//! Viewers connect with a WebSocket upgrade naming the stream they want:
//!
//! - `GET /ws/{stream}`
//! - `GET /ws?stream={stream}`
//! - `GET /` or `GET /ws` for the configured default stream
//!
//! A small JSON API under `/api` reports stream status and stops streams.

pub(crate) mod api;
pub mod config;
pub mod listener;
pub(crate) mod websocket;

pub use config::ServerConfig;
pub use listener::RelayServer;
