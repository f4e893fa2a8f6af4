//! WebSocket Gateway
//!
//! Real-time communication via WebSocket connections.

pub mod handler;
pub mod registry;

pub use handler::ws_handler;
pub use registry::{ConnectedSession, SessionRegistry};
