//! Child process lifecycle for process-backed backends
//!
//! A [`ProcessHandle`] owns one spawned child. Once the backend has wired
//! up its readers it calls [`ProcessHandle::watch`], which waits for the
//! child to exit (on its own or via [`ProcessHandle::kill`]), lets the
//! readers drain, and then reports termination through the session's
//! [`EventSink`] latch.

use super::EventSink;
use crate::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Piped standard streams of a spawned backend
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

pub struct ProcessHandle {
    label: &'static str,
    pid: Option<u32>,
    /// Held here until `watch` moves it into the exit watcher
    child: Mutex<Option<Child>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    kill_rx: Mutex<Option<oneshot::Receiver<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl ProcessHandle {
    /// Spawn `program` with piped stdio.
    ///
    /// Fails with `Error::Spawn` when the executable is missing or the OS
    /// refuses to create the process.
    pub fn spawn(
        label: &'static str,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        shutdown_timeout: Duration,
    ) -> Result<(Self, ProcessPipes)> {
        info!("Launching {} backend: {} {}", label, program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("Failed to get stderr".to_string()))?;

        let pid = child.id();
        debug!(?pid, "{} backend spawned", label);

        let (kill_tx, kill_rx) = oneshot::channel();
        let handle = Self {
            label,
            pid,
            child: Mutex::new(Some(child)),
            kill_tx: Mutex::new(Some(kill_tx)),
            kill_rx: Mutex::new(Some(kill_rx)),
            watcher: Mutex::new(None),
            shutdown_timeout,
        };
        Ok((handle, ProcessPipes { stdin, stdout, stderr }))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Start the exit watcher.
    ///
    /// `readers` are the tasks consuming the child's output; they get up
    /// to the shutdown timeout to drain before termination is reported,
    /// so trailing output is not cut off.
    pub async fn watch(&self, sink: EventSink, readers: Vec<JoinHandle<()>>) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        let Some(kill_rx) = self.kill_rx.lock().await.take() else {
            return;
        };
        let label = self.label;
        let drain_timeout = self.shutdown_timeout;

        let watcher = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        debug!("{} backend kill: {}", label, e);
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) => info!("{} backend exited: {}", label, status),
                Err(e) => warn!("Failed to wait for {} backend: {}", label, e),
            }

            for reader in readers {
                if tokio::time::timeout(drain_timeout, reader).await.is_err() {
                    debug!("{} backend reader did not drain in time", label);
                }
            }
            sink.terminated().await;
        });
        *self.watcher.lock().await = Some(watcher);
    }

    /// Kill the child and wait for the watcher to finish.
    ///
    /// Idempotent: a second call, or a call after the child exited on its
    /// own, does nothing.
    pub async fn kill(&self) {
        let unwatched = self.child.lock().await.take();
        if let Some(mut child) = unwatched {
            // Never watched: nobody else will reap it
            match child.kill().await {
                Ok(()) => debug!("{} backend killed before watch", self.label),
                Err(e) => debug!("{} backend kill: {}", self.label, e),
            }
            return;
        }

        if let Some(tx) = self.kill_tx.lock().await.take() {
            let _ = tx.send(());
        }

        let watcher = self.watcher.lock().await.take();
        if let Some(watcher) = watcher {
            // The watcher itself waits for readers; allow for both phases
            let budget = self.shutdown_timeout * 2;
            if tokio::time::timeout(budget, watcher).await.is_err() {
                warn!("{} backend did not exit within {:?}", self.label, budget);
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Best-effort since we can't await in Drop
        if let Some(mut child) = self.child.try_lock().ok().and_then(|mut c| c.take()) {
            let _ = child.start_kill();
        }
    }
}
