use std::fs;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::bootstrap::ShaderStage;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// New contents of a watched shader file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderChange {
    pub stage: ShaderStage,
    pub path: PathBuf,
    pub source: String,
}

/// Polls shader files on a background thread. Dropping the handle stops the
/// thread.
pub struct FileWatcher {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Starts watching `files`, calling `on_change` whenever a file's
    /// contents differ from the last read. Empty reads are skipped.
    pub fn spawn<F>(
        files: Vec<(ShaderStage, PathBuf)>,
        interval: Duration,
        on_change: F,
    ) -> Result<Self>
    where
        F: FnMut(ShaderChange) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("shaderpad-watch".into())
            .spawn(move || {
                let mut on_change = on_change;
                let mut watched: Vec<(ShaderStage, PathBuf, Option<String>)> = files
                    .into_iter()
                    .map(|(stage, path)| {
                        let current = fs::read_to_string(&path).ok();
                        (stage, path, current)
                    })
                    .collect();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    for (stage, path, last) in &mut watched {
                        let current = match fs::read_to_string(&*path) {
                            Ok(current) => current,
                            Err(err) => {
                                tracing::trace!(
                                    path = %path.display(),
                                    error = %err,
                                    "watched file unreadable"
                                );
                                continue;
                            }
                        };
                        // Editors truncate before writing; wait for the contents.
                        if current.is_empty() || last.as_deref() == Some(current.as_str()) {
                            continue;
                        }
                        tracing::info!(path = %path.display(), "shader changed; reloading");
                        *last = Some(current.clone());
                        on_change(ShaderChange {
                            stage: *stage,
                            path: path.clone(),
                            source: current,
                        });
                    }
                }
                tracing::debug!("file watcher stopped");
            })
            .map_err(|err| anyhow!("failed to spawn file watcher: {err}"))?;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
