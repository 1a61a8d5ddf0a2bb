//! Connection lifecycle, typed message transport and state throttling.

pub mod config;
pub mod connection;
pub mod manager;
pub mod sync;

pub use config::{DEFAULT_HOST, DEFAULT_MAX_PEERS, DEFAULT_PORT, Role, SessionConfig};
pub use connection::{ConnectionId, ConnectionInfo, ConnectionPhase};
pub use manager::{SessionEvent, SessionManager, resolve};
pub use sync::StateSync;
