use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::watch;

/// How often the blocking loop checks whether anyone is still listening.
const RECEIVER_POLL: Duration = Duration::from_millis(500);

/// Publishes reloaded configuration whenever the TOML file changes.
///
/// Invalid edits are logged and skipped; subscribers only ever observe
/// configurations that passed validation.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher with an initial configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(initial_config: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (Self { tx }, rx)
    }

    /// Watches the configuration file for changes and broadcasts updates.
    ///
    /// Runs until every receiver is dropped or the file system backend fails.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(&self, config_path: impl AsRef<Path>) -> Result<()> {
        let tx = self.tx.clone();
        let config_path: PathBuf = config_path.as_ref().to_path_buf();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(&config_path, RecursiveMode::NonRecursive)?;

            loop {
                let event = match notify_rx.recv_timeout(RECEIVER_POLL) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) if tx.is_closed() => break,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                if !event.kind.is_modify() {
                    continue;
                }
                tracing::info!(path = %config_path.display(), "Config file changed, reloading");
                match ConfigLoader::load_from(&config_path) {
                    Ok(new_config) => {
                        let changed = tx.send_if_modified(|current| {
                            if *current == new_config {
                                false
                            } else {
                                *current = new_config;
                                true
                            }
                        });
                        if changed {
                            tracing::info!("Config reloaded");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Rejected config reload, keeping previous values");
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_watcher_exposes_initial_config() {
        let initial = AppConfig::default();
        let (_watcher, rx) = ConfigWatcher::new(initial.clone());
        assert_eq!(*rx.borrow(), initial);
    }

    #[tokio::test]
    async fn watch_returns_once_receivers_are_gone() {
        let path = std::env::temp_dir().join(format!("straddle-watch-{}.toml", std::process::id()));
        std::fs::write(&path, "[strategy]\n").unwrap();

        let (watcher, rx) = ConfigWatcher::new(AppConfig::default());
        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), watcher.watch(&path))
            .await
            .unwrap()
            .unwrap();

        let _ = std::fs::remove_file(&path);
    }
}
