//! Tempo game session server.
//!
//! Hosts two-player timed games over WebSocket. Each room is driven by its
//! own task ([`actor`]); connections are routed to rooms by the
//! [`gateway::Gateway`], and rooms live in a shared
//! [`registry::RoomRegistry`].

pub mod actor;
pub mod broadcast;
pub mod config;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;
pub mod ticker;

pub use config::{RematchClocks, RoomConfig, ServerConfig};
pub use gateway::Gateway;
pub use registry::{RegistryError, RoomRegistry};
