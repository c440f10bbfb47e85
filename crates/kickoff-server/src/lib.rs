//! # kickoff-server
//!
//! Fan-out side of the pipeline.
//!
//! - [`registry`]: the single authority on which connections are live and what they filter on
//! - [`broadcaster`]: drains the publish slot and sends each connection its filtered view
//! - [`connection`]: per-connection lifecycle and the inbound control protocol
//! - [`server`]: axum router with `/ws`, `/health`, `/metrics` and optional static files

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod server;

pub use broadcaster::{Broadcaster, FanOutReport};
pub use config::ServerConfig;
pub use connection::{apply_control, CloseReason, ConnectionSettings, ConnectionState, ControlOutcome};
pub use error::ServerError;
pub use registry::{ConnectionHandle, ConnectionRegistry, SendError};
pub use server::{build_router, start, AppState, ServerHandle};
