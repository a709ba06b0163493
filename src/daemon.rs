//! Daemon wiring: workers, cancellation, and request dispatch
//!
//! The daemon is a small fixed set of cooperating threads:
//!
//! 1. the native notifier's callback admits events through the
//!    debouncer into the bounded channel,
//! 2. the engine worker drains that channel and applies captures,
//! 3. the control worker serves one request per connection on the
//!    Unix socket,
//! 4. transient workers run the initial scan.
//!
//! A process-wide `AtomicBool` is the cancellation token; SIGINT,
//! SIGTERM, and the control-plane stop request all flip it. Workers
//! finish their in-flight work and exit; the control worker unlinks
//! the socket on the way out.

use crate::control::{ControlRequest, ControlResponse, ControlServer};
use crate::engine::SnapshotEngine;
use crate::error::Result;
use crate::events::EventPipeline;
use crate::registry::Registry;
use crate::types::{DaemonStatus, WatchDetail};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long the engine worker waits on the channel before checking
/// the cancellation flag
const DRAIN_POLL: Duration = Duration::from_millis(250);

/// The running daemon state shared across workers
pub struct Daemon {
    registry: Arc<Registry>,
    pipeline: Arc<EventPipeline>,
    engine: Arc<SnapshotEngine>,
    cancel: Arc<AtomicBool>,
    start_time: RwLock<Option<DateTime<Utc>>>,
    workers: Arc<AtomicUsize>,
    socket_path: PathBuf,
}

impl Daemon {
    /// Build the daemon and subscribe every registered project
    pub fn new(registry: Registry, socket_path: &Path) -> Result<Arc<Daemon>> {
        let registry = Arc::new(registry);
        let pipeline = Arc::new(EventPipeline::new()?);
        let engine = Arc::new(SnapshotEngine::new(
            Arc::clone(&registry),
            Arc::clone(&pipeline),
        ));

        for project in registry.projects() {
            engine.subscribe_project(&project);
        }

        Ok(Arc::new(Daemon {
            registry,
            pipeline,
            engine,
            cancel: Arc::new(AtomicBool::new(false)),
            start_time: RwLock::new(None),
            workers: Arc::new(AtomicUsize::new(0)),
            socket_path: socket_path.to_path_buf(),
        }))
    }

    /// Run until a signal or a stop request arrives
    ///
    /// Binds the control socket first so startup fails fast when
    /// another daemon already holds it.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let server = ControlServer::bind(&self.socket_path)?;

        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&self.cancel))
            .map_err(crate::error::RewindError::Io)?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&self.cancel))
            .map_err(crate::error::RewindError::Io)?;

        *self.start_time.write() = Some(Utc::now());
        info!("rewind daemon starting");

        // Engine worker: drain the event channel.
        let engine_handle = {
            let daemon = Arc::clone(self);
            std::thread::spawn(move || {
                let _guard = WorkerGuard::new(&daemon.workers);
                let rx = daemon.pipeline.receiver();
                loop {
                    if daemon.cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    match rx.recv_timeout(DRAIN_POLL) {
                        Ok(event) => daemon.engine.handle_event(&event),
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("engine worker stopped");
            })
        };

        // Transient worker: initial scan re-synchronizes anything the
        // daemon missed while it was down.
        let scan_handle = {
            let daemon = Arc::clone(self);
            std::thread::spawn(move || {
                let _guard = WorkerGuard::new(&daemon.workers);
                daemon.engine.initial_scan();
            })
        };

        // Control worker: serve requests until cancellation.
        let control_handle = {
            let daemon = Arc::clone(self);
            std::thread::spawn(move || {
                let _guard = WorkerGuard::new(&daemon.workers);
                let cancel = Arc::clone(&daemon.cancel);
                server.serve(&cancel, |request| daemon.handle_request(request));
            })
        };

        scan_handle.join().ok();
        control_handle.join().ok();
        engine_handle.join().ok();

        // Best-effort unsubscribe so the notifier quiesces.
        for project in self.registry.projects() {
            self.engine.unsubscribe_project(&project);
        }

        info!("rewind daemon stopped");
        Ok(())
    }

    /// Flip the cancellation token
    pub fn shutdown(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Dispatch one control request
    pub fn handle_request(&self, request: ControlRequest) -> ControlResponse {
        match request.action.as_str() {
            "add" => {
                if request.path.is_empty() {
                    return ControlResponse::err("add requires a path");
                }
                match self.registry.add(Path::new(&request.path)) {
                    Ok(project) => {
                        self.engine.subscribe_project(&project);
                        ControlResponse::ok(format!(
                            "Successfully added watch for path: {}",
                            request.path
                        ))
                    }
                    Err(e) => ControlResponse::err(format!(
                        "Failed to add watch for path {}: {}",
                        request.path, e
                    )),
                }
            }
            "remove" => {
                // Legacy clients stop the daemon with an empty-path
                // remove; prefer the explicit "stop" action.
                if request.path.is_empty() {
                    self.shutdown();
                    return ControlResponse::ok("Daemon stopping");
                }
                match self.registry.remove(Path::new(&request.path)) {
                    Ok(project) => {
                        self.engine.unsubscribe_project(&project);
                        ControlResponse::ok(format!(
                            "Successfully removed watch from path: {}",
                            request.path
                        ))
                    }
                    Err(e) => ControlResponse::err(format!(
                        "Failed to remove watch for path {}: {}",
                        request.path, e
                    )),
                }
            }
            "status" => match serde_json::to_string(&self.status()) {
                Ok(json) => ControlResponse::ok(json),
                Err(e) => ControlResponse::err(format!("Failed to get status: {}", e)),
            },
            "stop" => {
                self.shutdown();
                ControlResponse::ok("Daemon stopping")
            }
            other => {
                warn!(action = other, "unknown control action");
                ControlResponse::err(format!("Unknown action: {}", other))
            }
        }
    }

    /// Snapshot of running state for the status payload
    pub fn status(&self) -> DaemonStatus {
        let start_time = *self.start_time.read();
        let is_running = start_time.is_some() && !self.is_cancelled();

        let uptime_duration = start_time
            .map(|t| {
                let elapsed = Utc::now().signed_duration_since(t);
                let secs = elapsed.num_seconds().max(0) as u64;
                humantime::format_duration(Duration::from_secs(secs)).to_string()
            })
            .unwrap_or_default();

        let projects = self.registry.projects();
        let watch_details: Vec<WatchDetail> = projects
            .iter()
            .map(|p| WatchDetail {
                path: p.root().display().to_string(),
                watch_dirs: p
                    .watch_dirs()
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect(),
                dir_count: p.watch_dir_count(),
                ignore_count: p.ignore_count(),
            })
            .collect();

        DaemonStatus {
            is_running,
            total_watches: projects.len(),
            total_watched_dirs: watch_details.iter().map(|d| d.dir_count).sum(),
            event_channel_size: self.pipeline.channel_len(),
            event_channel_capacity: self.pipeline.channel_capacity(),
            active_workers: self.workers.load(Ordering::Relaxed),
            start_time,
            uptime_duration,
            watch_details,
        }
    }
}

/// Counts a worker thread for the status payload while it lives
struct WorkerGuard {
    counter: Arc<AtomicUsize>,
}

impl WorkerGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        WorkerGuard {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project;
    use std::fs;
    use tempfile::TempDir;

    fn test_daemon() -> (Arc<Daemon>, TempDir, TempDir) {
        let config = TempDir::new().unwrap();
        let sockets = TempDir::new().unwrap();
        let registry = Registry::load_from(config.path().join("watchlist.json")).unwrap();
        let daemon = Daemon::new(registry, &sockets.path().join("rewind.sock")).unwrap();
        (daemon, config, sockets)
    }

    fn init_project_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        project::init_store(temp.path()).unwrap();
        temp
    }

    #[test]
    fn test_add_then_remove_via_requests() {
        let (daemon, _config, _sockets) = test_daemon();
        let proj = init_project_dir();
        fs::create_dir(proj.path().join("src")).unwrap();

        let response = daemon.handle_request(ControlRequest {
            action: "add".to_string(),
            path: proj.path().display().to_string(),
        });
        assert!(response.success, "{}", response.message);

        let status = daemon.status();
        assert_eq!(status.total_watches, 1);
        assert!(status.total_watched_dirs >= 2);
        assert_eq!(status.event_channel_capacity, 100);

        let response = daemon.handle_request(ControlRequest {
            action: "remove".to_string(),
            path: proj.path().display().to_string(),
        });
        assert!(response.success, "{}", response.message);
        assert_eq!(daemon.status().total_watches, 0);
    }

    #[test]
    fn test_add_requires_initialized_project() {
        let (daemon, _config, _sockets) = test_daemon();
        let bare = TempDir::new().unwrap();

        let response = daemon.handle_request(ControlRequest {
            action: "add".to_string(),
            path: bare.path().display().to_string(),
        });
        assert!(!response.success);
        assert!(response.message.contains("Failed to add watch"));
    }

    #[test]
    fn test_status_payload_shape() {
        let (daemon, _config, _sockets) = test_daemon();
        let response = daemon.handle_request(ControlRequest {
            action: "status".to_string(),
            path: String::new(),
        });
        assert!(response.success);

        let status: DaemonStatus = serde_json::from_str(&response.message).unwrap();
        assert!(!status.is_running); // run() was never called
        assert_eq!(status.total_watches, 0);
        assert!(status.watch_details.is_empty());
    }

    #[test]
    fn test_stop_actions() {
        let (daemon, _config, _sockets) = test_daemon();
        assert!(!daemon.is_cancelled());

        let response = daemon.handle_request(ControlRequest {
            action: "stop".to_string(),
            path: String::new(),
        });
        assert!(response.success);
        assert!(daemon.is_cancelled());
    }

    #[test]
    fn test_legacy_empty_remove_stops() {
        let (daemon, _config, _sockets) = test_daemon();
        let response = daemon.handle_request(ControlRequest {
            action: "remove".to_string(),
            path: String::new(),
        });
        assert!(response.success);
        assert!(daemon.is_cancelled());
    }

    #[test]
    fn test_unknown_action() {
        let (daemon, _config, _sockets) = test_daemon();
        let response = daemon.handle_request(ControlRequest {
            action: "explode".to_string(),
            path: String::new(),
        });
        assert!(!response.success);
        assert!(response.message.contains("Unknown action: explode"));
    }
}
