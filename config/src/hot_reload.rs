//! # Storage Config Hot Reload
//!
//! Watches `storage.json` for out-of-band edits so the registry can be
//! rebuilt without restarting the process.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Configuration reload event.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigReloadEvent {
    Ready,

    /// Configuration file was written or created
    Changed(PathBuf),

    /// Configuration file was removed
    Removed(PathBuf),

    /// Watcher failure
    Error {
        path: PathBuf,
        error: String
    }
}

/// Watch the storage document and emit reload events.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Saves replace `storage.json` through an atomic rename, which swaps the
/// file's inode. The watcher therefore observes the parent directory and
/// filters events down to the document's file name.
///
/// ## Usage
/// ```rust,no_run
/// use config::{hot_reload::ConfigReloadEvent, watch_storage_config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     let path = std::path::Path::new("data/storage.json");
///     let (_tx, mut rx) = watch_storage_config(path).await?;
///
///     while let Some(event) = rx.recv().await {
///         if let ConfigReloadEvent::Changed(path) = event {
///             println!("storage config changed: {:?}", path);
///         }
///     }
///     Ok(())
/// }
/// ```
///
/// ## Lifetime
/// The background task stops once every receiver is dropped.
pub async fn watch_storage_config(
    config_path: &Path
) -> Result<
    (
        tokio::sync::mpsc::Sender<ConfigReloadEvent>,
        tokio::sync::mpsc::Receiver<ConfigReloadEvent>
    ),
    Box<dyn std::error::Error + Send + Sync>
> {
    let config_path = config_path.to_path_buf();
    let watch_dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from(".")
    };

    if !watch_dir.is_dir() {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Config directory not found: {:?}", watch_dir)
        )));
    }

    let file_name = config_path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Config path has no file name: {:?}", config_path)
            )
        })?;

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let tx_task = tx.clone();

    tokio::spawn(async move {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(100);
        let mut watcher = match RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default()
        ) {
            Ok(w) => w,
            Err(e) => {
                let error_msg = format!("Failed to create file watcher: {}", e);
                error!("{}", error_msg);
                let _ = tx_task
                    .send(ConfigReloadEvent::Error {
                        path: config_path,
                        error: error_msg
                    })
                    .await;
                return;
            }
        };

        if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            let error_msg = format!("Failed to watch config directory: {}", e);
            error!("{}", error_msg);
            let _ = tx_task
                .send(ConfigReloadEvent::Error {
                    path: config_path,
                    error: error_msg
                })
                .await;
            return;
        }

        info!("Watching storage config: {:?}", config_path);
        let _ = tx_task.send(ConfigReloadEvent::Ready).await;

        loop {
            tokio::select! {
                _ = tx_task.closed() => {
                    debug!("Receiver dropped, stopping watcher for {:?}", config_path);
                    break;
                }
                event_result = event_rx.recv() => {
                    let Some(event_result) = event_result else {
                        break;
                    };

                    match event_result {
                        Ok(event) => {
                            let Some(path) = event
                                .paths
                                .iter()
                                .find(|p| p.file_name() == Some(file_name.as_os_str()))
                                .cloned()
                            else {
                                continue;
                            };

                            let reload_event = match event.kind {
                                EventKind::Create(_) | EventKind::Modify(_) => {
                                    info!("Storage config updated: {:?}", path);
                                    ConfigReloadEvent::Changed(path)
                                }
                                EventKind::Remove(_) => {
                                    warn!("Storage config removed: {:?}", path);
                                    ConfigReloadEvent::Removed(path)
                                }
                                _ => {
                                    debug!("Ignoring event: {:?}", event.kind);
                                    continue;
                                }
                            };

                            if let Err(e) = tx_task.send(reload_event).await {
                                error!("Failed to send config reload event: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Watch error: {}", e);
                        }
                    }
                }
            }
        }

        drop(watcher);
    });

    Ok((tx, rx))
}
