//! scout-term: a browser-reachable terminal for the scout pipeline.
//!
//! Each authenticated browser session owns one pseudo-terminal running the
//! restricted `scout-shell`. Any number of WebSocket connections from that
//! session can attach to it, see its recent output replayed, and drive it.

pub mod auth;
pub mod config;
pub mod errors;
pub mod shell;
pub mod terminal;

pub use auth::{Authenticator, CookieAuthenticator};
pub use config::{RegistryConfig, SpawnConfig};
pub use errors::{AuthError, GatewayError, ProtocolError, PtyError, RegistryError, SpawnError};
pub use terminal::{build_router, GatewayState, PtySpawner, SessionRegistry};
