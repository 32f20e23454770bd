//! cb-bridge: Reverse-connection bridge to a remote orchestrator
//!
//! The bridge registers with the orchestrator over HTTP, keeps the
//! registration alive with heartbeats, and serves the orchestrator's method
//! calls on a local endpoint. Calls are routed through a fixed method table
//! to crash analysis handlers that drive external tools.

pub mod connector;
pub mod crash;
pub mod dispatcher;
pub mod error;
pub mod server;

pub use connector::{ConnectorState, ConnectorStatus, HeartbeatStats, Session, SessionConnector};
pub use crash::CrashTools;
pub use dispatcher::{CrashHandlers, MethodDispatcher};
pub use error::RegistryError;
pub use server::AppState;
