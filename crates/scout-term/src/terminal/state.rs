//! Terminal session registry
//!
//! The single authority that binds session identifiers to live terminals.
//! Entry creation is serialized per key, so concurrent first connections for
//! one session share a single process. Spawning happens outside the map's
//! shard locks, so a slow spawn only holds up callers for the same key.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{error, info};

use super::pty::{ProcessExit, PtyEvent, Spawner};
use super::session::{TerminalSession, Viewer, ViewerId};
use super::types::{Geometry, SessionId};
use crate::config::RegistryConfig;
use crate::errors::RegistryError;

/// Result of a successful [`SessionRegistry::attach`].
pub struct Attachment {
    /// The session this viewer is bound to for its whole lifetime.
    pub session: Arc<TerminalSession>,
    /// Bytes of scrollback queued to the viewer ahead of live output.
    pub replayed: usize,
}

pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<TerminalSession>>,
    /// Held while a session for the key is being spawned.
    spawn_gates: DashMap<SessionId, Arc<Mutex<()>>>,
    spawner: Arc<dyn Spawner>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(spawner: Arc<dyn Spawner>, config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            spawn_gates: DashMap::new(),
            spawner,
            config,
        })
    }

    /// Return the live session for `id`, spawning one if there is none.
    ///
    /// Must be called from within a Tokio runtime: a newly created session
    /// gets an output pump task.
    pub fn get_or_create(
        self: &Arc<Self>,
        id: &SessionId,
        geometry: Geometry,
    ) -> Result<Arc<TerminalSession>, RegistryError> {
        if let Some(session) = self.get(id) {
            return Ok(session);
        }

        let gate = Arc::clone(self.spawn_gates.entry(id.clone()).or_default().value());
        let result = {
            let _spawning = gate.lock();
            // A caller that held the gate before us may have created it.
            match self.get(id) {
                Some(session) => Ok(session),
                None => self.spawn_session(id, geometry).map(|(session, events)| {
                    // Replaces a closed entry for the same key, if one is left.
                    self.sessions.insert(id.clone(), Arc::clone(&session));
                    tokio::spawn(run_output_pump(
                        Arc::downgrade(self),
                        Arc::clone(&session),
                        events,
                    ));
                    session
                }),
            }
        };

        // The map and this call are the only holders once no one else waits.
        self.spawn_gates.remove_if(id, |_, current| {
            Arc::ptr_eq(current, &gate) && Arc::strong_count(current) == 2
        });
        result
    }

    fn spawn_session(
        &self,
        id: &SessionId,
        geometry: Geometry,
    ) -> Result<(Arc<TerminalSession>, mpsc::UnboundedReceiver<PtyEvent>), RegistryError> {
        let spawned = self.spawner.spawn(geometry).map_err(|e| {
            error!(session_id = %id, "[registry] Spawn failed: {}", e);
            e
        })?;
        let session = Arc::new(TerminalSession::new(
            id.clone(),
            spawned.process,
            self.config.scrollback_bytes,
        ));
        info!(
            session_id = %id,
            pid = ?session.to_info().pid,
            "[registry] Session created"
        );
        Ok((session, spawned.events))
    }

    /// Get the live session for `id`, if any.
    pub fn get(&self, id: &SessionId) -> Option<Arc<TerminalSession>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| !session.is_closed())
    }

    /// Attach a viewer to the existing session for `id`.
    pub fn attach(&self, id: &SessionId, viewer: Viewer) -> Result<Attachment, RegistryError> {
        let session = self
            .get(id)
            .ok_or_else(|| RegistryError::NoSession(id.to_string()))?;
        let replayed = session
            .attach(viewer)
            .ok_or_else(|| RegistryError::NoSession(id.to_string()))?;
        Ok(Attachment { session, replayed })
    }

    /// Remove a viewer from the session for `id`. Idempotent; never ends
    /// the process.
    pub fn detach(&self, id: &SessionId, viewer_id: ViewerId) {
        if let Some(session) = self.sessions.get(id).map(|entry| Arc::clone(entry.value())) {
            session.detach(viewer_id);
        }
    }

    /// Kill the session's process, notify and drop its viewers, and remove
    /// it. Returns whether a session existed.
    pub fn destroy(&self, id: &SessionId) -> bool {
        let Some(session) = self.sessions.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        info!(session_id = %id, "[registry] Destroying session");
        session.terminate_process();
        session.close();
        self.remove(&session);
        true
    }

    /// Exit path, wired to each session's output pump.
    fn on_exit(&self, session: &Arc<TerminalSession>, exit: ProcessExit) {
        info!(session_id = %session.id, "[registry] Process exited ({})", exit);
        session.close();
        session.terminate_process();
        self.remove(session);
    }

    /// Remove `session` only if it is still the one registered under its id;
    /// a newer session for the same id is left in place.
    fn remove(&self, session: &Arc<TerminalSession>) {
        if self
            .sessions
            .remove_if(&session.id, |_, current| Arc::ptr_eq(current, session))
            .is_some()
        {
            info!(session_id = %session.id, "[registry] Session removed");
        }
    }

    /// Destroy every session. Returns how many were torn down.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.destroy(id)).count()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Forward a session's PTY events: output to the fan-out, exit to the
/// registry.
async fn run_output_pump(
    registry: Weak<SessionRegistry>,
    session: Arc<TerminalSession>,
    mut events: mpsc::UnboundedReceiver<PtyEvent>,
) {
    let mut exit = ProcessExit::default();
    while let Some(event) = events.recv().await {
        match event {
            PtyEvent::Output(data) => session.publish(data),
            PtyEvent::Exit(status) => {
                exit = status;
                break;
            }
        }
    }

    match registry.upgrade() {
        Some(registry) => registry.on_exit(&session, exit),
        None => {
            session.close();
            session.terminate_process();
        }
    }
}
