use std::io::{Read as IoRead, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::pipeline::OutputPipeline;

const READ_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// TermSize / ShellCommand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self::new(120, 30)
    }
}

/// What to spawn inside the PTY.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub size: TermSize,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            size: TermSize::default(),
        }
    }

    /// Interactive login shell for the current platform.
    pub fn login_shell(cwd: impl Into<PathBuf>) -> Self {
        let cmd = Self::new(Self::default_shell(), cwd).env("TERM", "xterm-256color");
        if cfg!(windows) {
            cmd
        } else {
            cmd.arg("-l")
        }
    }

    /// `$SHELL`, falling back to `/bin/bash` (`powershell.exe` on Windows).
    pub fn default_shell() -> String {
        if cfg!(windows) {
            return "powershell.exe".to_string();
        }
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "/bin/bash".to_string())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set a variable, replacing an earlier value for the same key.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.size = TermSize::new(cols, rows);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut builder = CommandBuilder::new(&self.program);
        for arg in &self.args {
            builder.arg(arg);
        }
        for (k, v) in &self.env {
            builder.env(k, v);
        }
        builder.cwd(&self.cwd);
        builder
    }
}

// ---------------------------------------------------------------------------
// ShellProcess
// ---------------------------------------------------------------------------

/// One interactive shell running inside a PTY.
///
/// A dedicated thread is the only reader of the PTY master; it publishes
/// every chunk to [`OutputPipeline`] and, on EOF, reaps the child and closes
/// the pipeline. A second thread owns the PTY writer and drains a channel,
/// so each [`ShellProcess::write`] lands as one uninterrupted write.
pub struct ShellProcess {
    id: String,
    pid: Option<u32>,
    cwd: PathBuf,
    writer: flume::Sender<Vec<u8>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    size: Mutex<TermSize>,
    exit: Arc<OnceLock<Option<u32>>>,
    /// Set once a kill was delivered, before the reader thread reaps the child.
    killed: AtomicBool,
    pipeline: Arc<OutputPipeline>,
}

impl ShellProcess {
    /// Spawn `command` in a fresh PTY. Errors here are fatal to the caller.
    pub fn start(
        id: impl Into<String>,
        command: &ShellCommand,
        buffer_capacity: usize,
    ) -> Result<Arc<Self>> {
        let id = id.into();
        let pair = native_pty_system()
            .openpty(command.size.to_pty_size())
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut child = pair
            .slave
            .spawn_command(command.to_builder())
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        // Only the child keeps the slave open, so the reader sees EOF on exit.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        info!(session = %id, program = %command.program, ?pid, cwd = %command.cwd.display(), "spawned shell");

        let pipeline = OutputPipeline::new(buffer_capacity);
        let exit: Arc<OnceLock<Option<u32>>> = Arc::new(OnceLock::new());

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // -- output reader thread --
        let reader_pipeline = pipeline.clone();
        let reader_exit = exit.clone();
        let reader_id = id.clone();
        std::thread::Builder::new()
            .name(format!("pty-reader-{id}"))
            .spawn(move || {
                let mut buf = [0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => reader_pipeline.publish(&buf[..n]),
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            // EIO is the normal way a PTY master reports child exit.
                            debug!(session = %reader_id, "pty reader finished: {e}");
                            break;
                        }
                    }
                }
                let code = match child.wait() {
                    Ok(status) => Some(status.exit_code()),
                    Err(e) => {
                        warn!(session = %reader_id, "failed to reap shell: {e}");
                        None
                    }
                };
                let _ = reader_exit.set(code);
                reader_pipeline.close(code);
                info!(session = %reader_id, ?code, "shell exited");
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // -- input writer thread --
        let (write_tx, write_rx) = flume::unbounded::<Vec<u8>>();
        let writer_id = id.clone();
        std::thread::Builder::new()
            .name(format!("pty-writer-{id}"))
            .spawn(move || {
                while let Ok(data) = write_rx.recv() {
                    if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                        debug!(session = %writer_id, "pty writer closed: {e}");
                        break;
                    }
                }
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        Ok(Arc::new(Self {
            id,
            pid,
            cwd: command.cwd.clone(),
            writer: write_tx,
            killer: Mutex::new(killer),
            master: Mutex::new(pair.master),
            size: Mutex::new(command.size),
            exit,
            killed: AtomicBool::new(false),
            pipeline,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn pipeline(&self) -> &Arc<OutputPipeline> {
        &self.pipeline
    }

    /// False as soon as the shell was killed, even if it is not reaped yet.
    pub fn is_alive(&self) -> bool {
        self.exit.get().is_none() && !self.killed.load(Ordering::Acquire)
    }

    /// Exit code once the shell has been reaped.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit.get().copied().flatten()
    }

    pub fn size(&self) -> TermSize {
        *lock_recover(&self.size, "size")
    }

    /// Send raw bytes to the shell, no framing.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if !self.is_alive() {
            return Err(SessionError::ProcessExited {
                code: self.exit_code(),
            });
        }
        self.writer
            .send(data.to_vec())
            .map_err(|_| SessionError::ProcessExited {
                code: self.exit_code(),
            })
    }

    /// Send a line followed by carriage return, as the Enter key would.
    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\r');
        self.write(&data)
    }

    /// Resize the PTY, reporting failure.
    pub fn try_resize(&self, cols: u16, rows: u16) -> Result<()> {
        let size = TermSize::new(cols, rows);
        lock_recover(&self.master, "master")
            .resize(size.to_pty_size())
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        *lock_recover(&self.size, "size") = size;
        debug!(session = %self.id, cols, rows, "pty resized");
        Ok(())
    }

    /// Resize the PTY; failures are logged and swallowed.
    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        match self.try_resize(cols, rows) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.id, cols, rows, "{e}");
                false
            }
        }
    }

    /// Terminate the shell. Safe to call any number of times.
    pub fn kill(&self) {
        if self.exit.get().is_some() || self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        match lock_recover(&self.killer, "killer").kill() {
            Ok(()) => info!(session = %self.id, "killed shell"),
            // Lost the race with a natural exit.
            Err(e) if self.exit.get().is_some() => {
                debug!(session = %self.id, "kill after exit: {e}")
            }
            Err(e) => {
                self.killed.store(false, Ordering::Release);
                warn!(session = %self.id, "failed to kill shell: {e}");
            }
        }
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for ShellProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellProcess")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn lock_recover<'a, T: ?Sized>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("{what} lock was poisoned, recovering");
        e.into_inner()
    })
}
