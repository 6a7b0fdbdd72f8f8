//! Terminal session gateway
//!
//! One pseudo-terminal per authenticated browser session, shared by every
//! connection from that session:
//! - `pty`: process and terminal device ownership
//! - `scrollback`: bounded replay buffer
//! - `session`: output fan-out and viewer set
//! - `state`: the session registry
//! - `api`: HTTP and WebSocket routes

pub mod api;
pub mod pty;
pub mod scrollback;
pub mod session;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use api::{build_router, terminal_routes, GatewayState};
pub use pty::{ProcessExit, PtyEvent, PtyHandle, PtyProcess, PtySpawner, SpawnedPty, Spawner};
pub use scrollback::Scrollback;
pub use session::{TerminalSession, Viewer, ViewerId};
pub use state::{Attachment, SessionRegistry};
pub use types::*;
