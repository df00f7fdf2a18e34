//! Wavehub - Real-time Broadcast Hub
//!
//! Accepts WebSocket connections and relays every message, whether sent by a
//! peer or produced internally, to every connected peer.
//!
//! ## Features
//!
//! - One ordered broadcast channel shared by all producers
//! - Lock-guarded connection registry with copy-before-iterate fan-out
//! - Bounded per-connection writes; failing peers are pruned without
//!   affecting the rest
//! - Synthetic graph/spectrum/map producer for demos
//! - Health and status endpoints

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{HubError, Result};
pub use hub::{Dispatcher, Hub, Publisher};
pub use models::Message;
