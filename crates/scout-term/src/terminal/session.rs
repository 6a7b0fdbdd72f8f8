//! Terminal session implementation
//!
//! A session binds one pseudo-terminal process to its scrollback and the set
//! of viewers currently attached to it:
//! - Output fan-out to every viewer, in production order
//! - Scrollback replay on attach
//! - Input and resize forwarding to the process

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pty::PtyProcess;
use super::scrollback::Scrollback;
use super::types::{Geometry, ServerMessage, SessionId, TerminalInfo};
use crate::errors::PtyError;

pub type ViewerId = Uuid;

/// Messages a viewer may have queued before it is dropped as stalled.
pub const VIEWER_QUEUE_CAPACITY: usize = 1024;

/// Registry-side handle of one attached connection.
///
/// Holds only the sending half of the viewer's queue; dropping the
/// connection never affects the session.
#[derive(Debug)]
pub struct Viewer {
    id: ViewerId,
    tx: mpsc::Sender<ServerMessage>,
}

enum Delivery {
    Queued,
    /// The queue is full up to the slot kept for `exit`.
    Stalled,
    Disconnected,
}

impl Viewer {
    pub fn new() -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE_CAPACITY);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Queue an output message. The last free slot is never used here, so
    /// a viewer that is still attached always has room for `exit`.
    fn send_output(&self, message: ServerMessage) -> Delivery {
        if self.tx.is_closed() {
            return Delivery::Disconnected;
        }
        if self.tx.capacity() <= 1 {
            return Delivery::Stalled;
        }
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Stalled,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }

    fn send_exit(&self) {
        let _ = self.tx.try_send(ServerMessage::Exit);
    }
}

/// State that must change atomically with respect to output fan-out.
struct Shared {
    scrollback: Scrollback,
    viewers: Vec<Viewer>,
    closed: bool,
}

/// A terminal process with its scrollback and attached viewers
pub struct TerminalSession {
    pub id: SessionId,
    process: Box<dyn PtyProcess>,
    shared: Mutex<Shared>,
    /// Creation timestamp
    pub created_at: f64,
}

impl TerminalSession {
    pub fn new(id: SessionId, process: Box<dyn PtyProcess>, scrollback_bytes: usize) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            id,
            process,
            shared: Mutex::new(Shared {
                scrollback: Scrollback::new(scrollback_bytes),
                viewers: Vec::new(),
                closed: false,
            }),
            created_at,
        }
    }

    /// Record an output chunk and deliver it to every attached viewer.
    ///
    /// Viewers whose connection has gone away, or whose queue is full, are
    /// dropped on the way. Dropping a viewer closes its queue, which ends
    /// its connection; it never skips or merges chunks.
    pub fn publish(&self, data: String) {
        let mut shared = self.shared.lock();
        if shared.closed {
            return;
        }
        shared.scrollback.append(&data);

        let message = ServerMessage::Output { data };
        let id = &self.id;
        shared
            .viewers
            .retain(|viewer| match viewer.send_output(message.clone()) {
                Delivery::Queued => true,
                Delivery::Stalled => {
                    warn!("[session:{}] Dropping stalled viewer {}", id, viewer.id);
                    false
                }
                Delivery::Disconnected => {
                    debug!("[session:{}] Pruned disconnected viewer {}", id, viewer.id);
                    false
                }
            });
    }

    /// Add a viewer, replaying the current scrollback to it first.
    ///
    /// Returns the number of replayed bytes, or `None` if the session has
    /// already been torn down.
    pub fn attach(&self, viewer: Viewer) -> Option<usize> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return None;
        }

        let replayed = shared.scrollback.len();
        if replayed > 0 {
            // A fresh queue always has room for the snapshot.
            viewer.send_output(ServerMessage::Output {
                data: shared.scrollback.snapshot(),
            });
        }
        info!(
            "[session:{}] Viewer {} attached ({} bytes replayed)",
            self.id, viewer.id, replayed
        );
        shared.viewers.push(viewer);
        Some(replayed)
    }

    /// Remove a viewer. Returns whether it was attached.
    pub fn detach(&self, viewer_id: ViewerId) -> bool {
        let mut shared = self.shared.lock();
        let before = shared.viewers.len();
        shared.viewers.retain(|viewer| viewer.id != viewer_id);
        let removed = shared.viewers.len() != before;
        if removed {
            info!("[session:{}] Viewer {} detached", self.id, viewer_id);
        }
        removed
    }

    pub fn write_input(&self, data: &str) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::NotRunning);
        }
        self.process.write(data.as_bytes())
    }

    pub fn resize(&self, geometry: Geometry) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::NotRunning);
        }
        self.process.resize(geometry)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn viewer_count(&self) -> usize {
        self.shared.lock().viewers.len()
    }

    pub fn scrollback(&self) -> String {
        self.shared.lock().scrollback.snapshot()
    }

    /// Kill the process and release its terminal device.
    pub(crate) fn terminate_process(&self) {
        self.process.terminate();
    }

    /// Notify every viewer that the terminal is gone, then drop them and the
    /// scrollback. Only the first call has any effect; returns whether this
    /// call closed the session.
    pub(crate) fn close(&self) -> bool {
        let mut shared = self.shared.lock();
        if shared.closed {
            return false;
        }
        shared.closed = true;
        for viewer in shared.viewers.drain(..) {
            viewer.send_exit();
        }
        shared.scrollback.clear();
        true
    }

    /// Get session info for API responses
    pub fn to_info(&self) -> TerminalInfo {
        let geometry = self.process.geometry();
        let shared = self.shared.lock();
        TerminalInfo {
            session_id: self.id.clone(),
            pid: self.process.pid(),
            cols: geometry.cols,
            rows: geometry.rows,
            viewers: shared.viewers.len(),
            scrollback_bytes: shared.scrollback.len(),
            created_at: self.created_at,
        }
    }
}
