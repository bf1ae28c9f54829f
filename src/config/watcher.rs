//! Configuration file watcher for hot reload.
//!
//! Only retry settings and the default deadline are applied live. Sections
//! that size shared resources (queue, gate, workers, breaker) are reported by
//! [`restart_required`] and left untouched until the process restarts.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::PipelineConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<PipelineConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver of validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<PipelineConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(config) => {
                            tracing::info!(path = ?path, "Pipeline config reloaded from disk");
                            let _ = tx.send(config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Rejected config reload, keeping current settings");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Sections that differ between `current` and `next` but cannot be applied live.
pub fn restart_required(current: &PipelineConfig, next: &PipelineConfig) -> Vec<&'static str> {
    let mut sections = Vec::new();
    if current.queue != next.queue {
        sections.push("queue");
    }
    if current.gate != next.gate {
        sections.push("gate");
    }
    if current.circuit_breaker != next.circuit_breaker {
        sections.push("circuit_breaker");
    }
    if current.dispatcher != next.dispatcher {
        sections.push("dispatcher");
    }
    if current.timeouts.attempt_timeout_ms != next.timeouts.attempt_timeout_ms {
        sections.push("timeouts.attempt_timeout_ms");
    }
    if current.observability != next.observability {
        sections.push("observability");
    }
    sections
}
