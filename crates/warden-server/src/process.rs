//! Game server process supervision
//!
//! A [`Supervisor`] owns at most one child process at a time. Every state
//! transition happens under one mutex, so a stop request racing an exit
//! discovered on the log stream collapses into a single teardown and the
//! exit notification fires exactly once per run.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, error, info, warn};
use warden_core::{Result, WardenError, split_entries};

/// Lifecycle state of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Offline,
    Starting,
    Running,
    /// Exit was discovered on the log stream
    Exiting,
    Killing,
    /// Exit was requested by an operator or a monitor
    Aborting,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How to launch the process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub args: Vec<String>,
    /// How long to wait for the process after asking it to die
    pub kill_timeout: Duration,
}

/// Delivered once when a run ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Run number within this supervisor
    pub run: u64,
    /// Exit code, when the OS reported one
    pub code: Option<i32>,
    /// Whether the stop was requested rather than discovered
    pub requested: bool,
}

/// Memory figures of the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub resident_bytes: u64,
    pub peak_bytes: u64,
}

/// Log entries read from the process's stdout
pub struct LogLines {
    reader: BufReader<ChildStdout>,
    buf: Vec<u8>,
    pending: VecDeque<String>,
}

impl LogLines {
    fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
            buf: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Next non-empty log entry, `None` once the stream closed.
    ///
    /// Safe to use in `tokio::select!`: partially read bytes stay buffered.
    pub async fn next_entry(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Ok(Some(entry));
            }

            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| WardenError::Process(format!("Failed to read stdout: {}", e)))?;

            if read == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            self.pending.extend(split_entries(&line));
        }
    }
}

struct Live {
    child: Child,
    pid: Option<u32>,
    run: u64,
    exited: Option<oneshot::Sender<ProcessExit>>,
}

struct Inner {
    live: Option<Live>,
}

/// Owns the game server process
pub struct Supervisor {
    config: ProcessConfig,
    inner: Mutex<Inner>,
    state: watch::Sender<ProcessState>,
    runs: AtomicU64,
}

impl Supervisor {
    pub fn new(config: ProcessConfig) -> Self {
        let (state, _) = watch::channel(ProcessState::Offline);
        Self {
            config,
            inner: Mutex::new(Inner { live: None }),
            state,
            runs: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Number of runs started by this supervisor
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ProcessState) {
        debug!("Process state -> {}", state);
        self.state.send_replace(state);
    }

    /// Launch the process.
    ///
    /// Returns the log stream and a receiver that fires once the run ends.
    pub async fn start(&self) -> Result<(LogLines, oneshot::Receiver<ProcessExit>)> {
        let mut inner = self.inner.lock().await;
        if inner.live.is_some() {
            return Err(WardenError::Process(
                "Process is already running".to_string(),
            ));
        }

        self.set_state(ProcessState::Starting);
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Starting run {}: {} {:?}",
            run,
            self.config.executable.display(),
            self.config.args
        );

        let mut command = Command::new(&self.config.executable);
        command
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.set_state(ProcessState::Offline);
                return Err(WardenError::Process(format!(
                    "Failed to spawn {}: {}",
                    self.config.executable.display(),
                    e
                )));
            }
        };

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            self.set_state(ProcessState::Offline);
            return Err(WardenError::Process("Child stdout was not captured".to_string()));
        };

        let (exit_tx, exit_rx) = oneshot::channel();
        let pid = child.id();
        inner.live = Some(Live {
            child,
            pid,
            run,
            exited: Some(exit_tx),
        });
        self.set_state(ProcessState::Running);
        info!("Run {} started (pid {:?})", run, pid);

        Ok((LogLines::new(stdout), exit_rx))
    }

    /// Request termination. Returns false if there was nothing to stop.
    pub async fn stop(&self) -> bool {
        self.teardown(true).await
    }

    /// The log stream closed; treat it as an exit
    pub async fn notify_stream_closed(&self) -> bool {
        self.teardown(false).await
    }

    async fn teardown(&self, requested: bool) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(mut live) = inner.live.take() else {
            debug!("Teardown requested with no live process");
            return false;
        };

        self.set_state(if requested {
            ProcessState::Aborting
        } else {
            ProcessState::Exiting
        });
        self.set_state(ProcessState::Killing);

        let timeout = self.config.kill_timeout;
        let mut code = None;
        let mut reaped = matches!(live.child.try_wait(), Ok(Some(_)));

        // A closed log stream usually means the process is on its way out
        if !reaped && !requested {
            if let Ok(result) = tokio::time::timeout(timeout, live.child.wait()).await {
                code = result.ok().and_then(|status| status.code());
                reaped = true;
            } else {
                warn!("Log stream of run {} closed but the process is alive", live.run);
            }
        }

        if !reaped {
            info!("Killing run {}", live.run);
            if let Err(e) = live.child.start_kill() {
                warn!("Failed to signal run {}: {}", live.run, e);
            }
        }

        if code.is_none() {
            code = match tokio::time::timeout(timeout, live.child.wait()).await {
                Ok(Ok(status)) => status.code(),
                Ok(Err(e)) => {
                    error!("Failed to wait for run {}: {}", live.run, e);
                    None
                }
                Err(_) => {
                    error!("Run {} did not exit within {:?}", live.run, timeout);
                    None
                }
            };
        }

        self.set_state(ProcessState::Offline);
        info!("Run {} ended (code {:?}, requested: {})", live.run, code, requested);

        if let Some(exited) = live.exited.take() {
            let _ = exited.send(ProcessExit {
                run: live.run,
                code,
                requested,
            });
        }
        true
    }

    /// OS process id of the live process
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.live.as_ref().and_then(|live| live.pid)
    }

    /// Memory usage of the live process, where the platform exposes it
    pub async fn memory_usage(&self) -> Option<MemoryUsage> {
        let pid = self.pid().await?;
        let status = tokio::fs::read_to_string(format!("/proc/{}/status", pid))
            .await
            .ok()?;
        parse_proc_status(&status)
    }
}

fn parse_proc_status(status: &str) -> Option<MemoryUsage> {
    let field = |name: &str| {
        status
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let resident_bytes = field("VmRSS:")?;
    let peak_bytes = field("VmHWM:").unwrap_or(resident_bytes);
    Some(MemoryUsage {
        resident_bytes,
        peak_bytes,
    })
}
