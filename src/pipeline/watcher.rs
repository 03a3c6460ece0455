//! Filesystem watcher feeding changed source files into the pipeline inbox

use super::InboxEmitter;
use crate::parser::usage::is_source_file;
use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Watches a project root; bursts of changes are coalesced per path
pub struct SourceWatcher {
    root: PathBuf,
    debounce: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl SourceWatcher {
    pub fn new(root: &Path, debounce: Duration) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize {}", root.display()))?;
        Ok(Self {
            root,
            debounce,
            stop_tx: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start the watcher background task
    pub fn start(&mut self, inbox: InboxEmitter) -> Result<()> {
        if self.stop_tx.is_some() {
            return Ok(());
        }

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let (event_tx, mut event_rx) = mpsc::channel::<PathBuf>(256);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                    for path in event.paths {
                        if is_source_file(&path) {
                            let _ = event_tx.blocking_send(path);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Watch error: {}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .context("Failed to create watcher")?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;

        self.stop_tx = Some(stop_tx);
        let debounce = self.debounce;

        tokio::spawn(async move {
            // Dropping the watcher ends the notify thread
            let _watcher = watcher;
            let mut pending = BTreeSet::new();

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Source watcher stopping");
                        break;
                    }
                    Some(path) = event_rx.recv() => {
                        pending.insert(path);
                        // Keep collecting until the burst goes quiet
                        loop {
                            match tokio::time::timeout(debounce, event_rx.recv()).await {
                                Ok(Some(path)) => {
                                    pending.insert(path);
                                }
                                Ok(None) | Err(_) => break,
                            }
                        }
                        for path in std::mem::take(&mut pending) {
                            tracing::debug!("File changed: {}", path.display());
                            inbox.file_changed(path);
                        }
                    }
                }
            }
        });

        tracing::info!("Watching {}", self.root.display());
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}
