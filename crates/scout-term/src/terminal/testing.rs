//! In-memory stand-ins for pseudo-terminals, used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::pty::{ProcessExit, PtyEvent, PtyProcess, SpawnedPty, Spawner};
use super::types::Geometry;
use crate::errors::{PtyError, SpawnError};

pub struct FakeProcess {
    alive: AtomicBool,
    geometry: Mutex<Geometry>,
    input: Mutex<String>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<PtyEvent>>>,
    terminations: AtomicUsize,
}

impl FakeProcess {
    pub fn new(geometry: Geometry) -> (Arc<Self>, mpsc::UnboundedReceiver<PtyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let process = Arc::new(Self {
            alive: AtomicBool::new(true),
            geometry: Mutex::new(geometry),
            input: Mutex::new(String::new()),
            events_tx: Mutex::new(Some(tx)),
            terminations: AtomicUsize::new(0),
        });
        (process, rx)
    }

    pub fn boxed(geometry: Geometry) -> (Box<dyn PtyProcess>, Arc<Self>) {
        let (process, _rx) = Self::new(geometry);
        (Box::new(FakeHandle(Arc::clone(&process))), process)
    }

    /// Produce an output chunk as the child would.
    pub fn emit(&self, data: &str) {
        if let Some(tx) = self.events_tx.lock().as_ref() {
            let _ = tx.send(PtyEvent::Output(data.to_string()));
        }
    }

    /// End the process on its own with `code`.
    pub fn exit(&self, code: u32) {
        self.finish(ProcessExit::with_code(code));
    }

    fn finish(&self, exit: ProcessExit) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(tx) = self.events_tx.lock().take() {
            let _ = tx.send(PtyEvent::Exit(exit));
        }
    }

    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn input(&self) -> String {
        self.input.lock().clone()
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

struct FakeHandle(Arc<FakeProcess>);

impl PtyProcess for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn geometry(&self) -> Geometry {
        *self.0.geometry.lock()
    }

    fn is_alive(&self) -> bool {
        self.0.is_running()
    }

    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.0.is_running() {
            return Err(PtyError::NotRunning);
        }
        self.0.input.lock().push_str(&String::from_utf8_lossy(data));
        Ok(())
    }

    fn resize(&self, geometry: Geometry) -> Result<(), PtyError> {
        *self.0.geometry.lock() = geometry;
        Ok(())
    }

    fn terminate(&self) {
        self.0.terminations.fetch_add(1, Ordering::SeqCst);
        self.0.finish(ProcessExit::default());
    }
}

/// Hands out [`FakeProcess`]es and remembers each one.
#[derive(Default)]
pub struct FakeSpawner {
    spawned: Mutex<Vec<Arc<FakeProcess>>>,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawner that takes a while to start each process, to widen races.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().len()
    }

    pub fn process(&self, index: usize) -> Arc<FakeProcess> {
        Arc::clone(&self.spawned.lock()[index])
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, geometry: Geometry) -> Result<SpawnedPty, SpawnError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(SpawnError::Command {
                command: "fake".to_string(),
                reason: "refused".to_string(),
            });
        }
        let (process, events) = FakeProcess::new(geometry);
        self.spawned.lock().push(Arc::clone(&process));
        Ok(SpawnedPty {
            process: Box::new(FakeHandle(process)),
            events,
        })
    }
}
