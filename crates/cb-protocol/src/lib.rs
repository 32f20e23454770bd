//! cb-protocol: Wire types for crash-bridge
//!
//! This crate defines the JSON bodies exchanged with the remote orchestrator:
//! the outbound registration and heartbeat requests, and the inbound method
//! dispatch envelope.

pub mod content;
pub mod dispatch;
pub mod error;
pub mod message;

pub use content::{extract_text, ContentBlock, HandlerOutput};
pub use dispatch::{DispatchRequest, DispatchResponse, DispatchResult, Method, Params, ParamsExt};
pub use error::ProtocolError;
pub use message::{
    HeartbeatRequest, RegisterRequest, RegisterResponse, ServerId, CONNECT_PATH,
    HEARTBEAT_PATH, REQUEST_PATH, SERVER_TYPE,
};
