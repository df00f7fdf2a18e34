//! WebSocket handlers

pub mod stream;
