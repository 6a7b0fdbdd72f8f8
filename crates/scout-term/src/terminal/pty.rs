//! Pseudo-terminal handle
//!
//! Owns one OS pseudo-terminal and the child process attached to it:
//! - Process spawning in the configured working directory
//! - Input through a dedicated writer thread
//! - Output and the final exit notification through a dedicated reader thread

use std::fmt;
use std::io::{Read, Write as IoWrite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::types::Geometry;
use crate::config::SpawnConfig;
use crate::errors::{PtyError, SpawnError};

const PTY_WRITE_CHUNK_SIZE: usize = 512;
pub const PTY_READ_BUFFER_SIZE: usize = 4096;

/// How the child process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the child was killed by a signal or its status could
    /// not be collected.
    pub code: Option<u32>,
    /// Name of the signal that killed the child.
    pub signal: Option<String>,
}

impl ProcessExit {
    pub fn with_code(code: u32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }
}

impl From<&ExitStatus> for ProcessExit {
    fn from(status: &ExitStatus) -> Self {
        match status.signal() {
            Some(signal) => Self::with_signal(signal),
            None => Self::with_code(status.exit_code()),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.signal, self.code) {
            (Some(signal), _) => write!(f, "killed by {signal}"),
            (None, Some(code)) => write!(f, "exit code {code}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Events produced by a pseudo-terminal, in order.
///
/// Zero or more `Output` chunks are followed by exactly one `Exit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Output(String),
    Exit(ProcessExit),
}

/// A running terminal process as seen by the session registry.
pub trait PtyProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn geometry(&self) -> Geometry;

    fn is_alive(&self) -> bool;

    /// Queue input for the process. Fails with [`PtyError::NotRunning`]
    /// once the process has exited or been terminated.
    fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    fn resize(&self, geometry: Geometry) -> Result<(), PtyError>;

    /// Kill the process and release the terminal device. Idempotent.
    fn terminate(&self);
}

/// A freshly spawned process plus its event stream.
pub struct SpawnedPty {
    pub process: Box<dyn PtyProcess>,
    pub events: mpsc::UnboundedReceiver<PtyEvent>,
}

/// Creates terminal processes for the registry.
pub trait Spawner: Send + Sync {
    fn spawn(&self, geometry: Geometry) -> Result<SpawnedPty, SpawnError>;
}

/// Spawns real pseudo-terminals running the configured program.
pub struct PtySpawner {
    config: SpawnConfig,
}

impl PtySpawner {
    pub fn new(config: SpawnConfig) -> Self {
        Self { config }
    }
}

impl Spawner for PtySpawner {
    fn spawn(&self, geometry: Geometry) -> Result<SpawnedPty, SpawnError> {
        let (handle, events) = PtyHandle::spawn(&self.config, geometry)?;
        Ok(SpawnedPty {
            process: Box::new(handle),
            events,
        })
    }
}

/// Owns a portable-pty master, the child's killer and the input channel.
pub struct PtyHandle {
    pid: Option<u32>,
    geometry: Mutex<Geometry>,
    /// `None` once the device has been released.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    /// Input channel to the writer thread; `None` after terminate.
    input_tx: Mutex<Option<Sender<Vec<u8>>>>,
    alive: Arc<AtomicBool>,
}

impl PtyHandle {
    /// Open a PTY and spawn the configured program on it.
    pub fn spawn(
        config: &SpawnConfig,
        geometry: Geometry,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PtyEvent>), SpawnError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(geometry))
            .map_err(|e| SpawnError::OpenPty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.program);
        cmd.args(&config.args);
        cmd.cwd(&config.cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SpawnError::Command {
                command: config.program.clone(),
                reason: e.to_string(),
            })?;
        // The slave must be closed on our side or the reader never sees EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Io(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::Io(format!("failed to take PTY writer: {e}")))?;

        let label = pid.map_or_else(|| "?".to_string(), |p| p.to_string());
        let alive = Arc::new(AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = channel();

        spawn_pty_writer_thread(label.clone(), writer, input_rx);
        spawn_pty_reader_thread(label, reader, child, Arc::clone(&alive), events_tx);

        info!(
            "[pty:{}] Spawned `{}` in {} ({}x{})",
            pid.unwrap_or(0),
            config.program,
            config.cwd.display(),
            geometry.cols,
            geometry.rows
        );

        let handle = Self {
            pid,
            geometry: Mutex::new(geometry),
            master: Mutex::new(Some(pair.master)),
            killer: Mutex::new(killer),
            input_tx: Mutex::new(Some(input_tx)),
            alive,
        };

        Ok((handle, events_rx))
    }
}

impl PtyProcess for PtyHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn geometry(&self) -> Geometry {
        *self.geometry.lock()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_alive() {
            return Err(PtyError::NotRunning);
        }
        let input_tx = self.input_tx.lock();
        let tx = input_tx.as_ref().ok_or(PtyError::NotRunning)?;
        tx.send(data.to_vec()).map_err(|_| PtyError::NotRunning)
    }

    fn resize(&self, geometry: Geometry) -> Result<(), PtyError> {
        let master = self.master.lock();
        let master = master.as_ref().ok_or(PtyError::NotRunning)?;
        master
            .resize(pty_size(geometry))
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;
        *self.geometry.lock() = geometry;
        Ok(())
    }

    fn terminate(&self) {
        if let Err(e) = self.killer.lock().kill() {
            // Usually means the process already exited.
            debug!("[pty:{}] Kill failed: {}", self.pid.unwrap_or(0), e);
        }
        self.input_tx.lock().take();
        if self.master.lock().take().is_some() {
            info!("[pty:{}] Terminal released", self.pid.unwrap_or(0));
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows,
        cols: geometry.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Spawns a dedicated thread for PTY writes
fn spawn_pty_writer_thread(label: String, mut writer: Box<dyn IoWrite + Send>, input_rx: Receiver<Vec<u8>>) {
    std::thread::spawn(move || {
        let mut total_bytes_written: usize = 0;

        while let Ok(data) = input_rx.recv() {
            for chunk in data.chunks(PTY_WRITE_CHUNK_SIZE) {
                if let Err(e) = writer.write_all(chunk).and_then(|_| writer.flush()) {
                    warn!(
                        "[writer:{}] Write error: {} (errno: {:?})",
                        label,
                        e,
                        e.raw_os_error()
                    );
                    return;
                }
            }
            total_bytes_written += data.len();
        }

        debug!(
            "[writer:{}] Writer thread finished. Total: {} bytes",
            label, total_bytes_written
        );
    });
}

/// Spawns a dedicated thread that drains PTY output, then reaps the child.
fn spawn_pty_reader_thread(
    label: String,
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    alive: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<PtyEvent>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; PTY_READ_BUFFER_SIZE];
        let mut pending: Vec<u8> = Vec::new();
        let mut total_bytes_read: usize = 0;

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    total_bytes_read += n;
                    pending.extend_from_slice(&buf[..n]);

                    let valid_up_to = find_utf8_boundary(&pending);
                    if valid_up_to > 0 {
                        let data = String::from_utf8_lossy(&pending[..valid_up_to]).into_owned();
                        pending.drain(..valid_up_to);
                        // Nobody listening just means the session is gone.
                        let _ = events_tx.send(PtyEvent::Output(data));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Linux reports EIO on the master once the child is gone.
                    debug!("[reader:{}] Read ended: {}", label, e);
                    break;
                }
            }
        }

        if !pending.is_empty() {
            let data = String::from_utf8_lossy(&pending).into_owned();
            let _ = events_tx.send(PtyEvent::Output(data));
        }

        let exit = match child.wait() {
            Ok(status) => ProcessExit::from(&status),
            Err(e) => {
                error!("[reader:{}] Failed to reap child: {}", label, e);
                ProcessExit::default()
            }
        };
        alive.store(false, Ordering::SeqCst);

        info!(
            "[reader:{}] Process finished ({}). Total: {} bytes",
            label, exit, total_bytes_read
        );
        let _ = events_tx.send(PtyEvent::Exit(exit));
    });
}

/// Find the last valid UTF-8 boundary in a byte slice
pub fn find_utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        // An incomplete sequence at the end is held back for the next read.
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // Genuinely invalid bytes are passed through and replaced lossily.
        Err(_) => bytes.len(),
    }
}
