//! Arena Module
//!
//! The service that ties matchmaking, battles and ratings together, its
//! wire protocol, the fallback opponent and the WebSocket gateway.
//!
//! ## Module Structure
//!
//! - `protocol`: Commands, events and wire messages
//! - `service`: Orchestration, settlement and the ticker
//! - `bot`: Fallback opponent policy
//! - `auth`: JWT validation for gateway logins
//! - `gateway`: WebSocket transport

pub mod protocol;
pub mod service;
pub mod bot;
pub mod auth;
pub mod gateway;

// Re-export key types
pub use protocol::{Ack, ActionFrame, ArenaCommand, ArenaEvent, ErrorCode, ServerError, ServerMessage};
pub use service::{ActionReceipt, ArenaError, ArenaService, JoinReceipt, TickReport};
pub use auth::{AuthConfig, AuthError, TokenClaims};
pub use gateway::{ArenaGateway, GatewayConfig, GatewayError};
