//! Control-plane transport: one JSON request per connection
//!
//! The daemon listens on a Unix-domain socket (`/tmp/rewind.sock`,
//! unlinked before bind). Each connection carries exactly one
//! request and one response, both UTF-8 JSON. Frames are capped at
//! 4096 bytes on the read side; status responses can run longer and
//! are read to EOF on the client. Both sides apply a 5 second
//! timeout.
//!
//! The transport knows nothing about the daemon: the accept loop
//! hands decoded requests to a dispatch closure and writes back
//! whatever it returns.

use crate::error::{Result, RewindError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default socket location
pub const SOCKET_PATH: &str = "/tmp/rewind.sock";

/// Maximum request frame size
const MAX_FRAME: usize = 4096;

/// Per-request I/O timeout
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the accept loop checks the cancellation flag
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// A control request from a client
///
/// `action` is a free string so unknown actions get a proper error
/// response instead of a framing failure. The legacy form
/// `{"action":"remove","path":""}` is still accepted as a stop
/// request by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub path: String,
}

/// The response written back on the same connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        ControlResponse {
            success: true,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ControlResponse {
            success: false,
            message: message.into(),
        }
    }
}

/// Listening side of the control plane
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlServer {
    /// Bind the socket, unlinking any stale file first
    pub fn bind(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| RewindError::ipc(format!("failed to bind {:?}: {}", socket_path, e)))?;
        // Non-blocking accept so the loop can observe cancellation.
        listener.set_nonblocking(true)?;

        info!(path = %socket_path.display(), "control plane listening");
        Ok(ControlServer {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Accept and serve connections until `cancel` flips
    ///
    /// Each connection is handled synchronously: read one request,
    /// dispatch, write one response, close. The socket file is
    /// unlinked when the loop exits.
    pub fn serve<F>(&self, cancel: &AtomicBool, mut dispatch: F)
    where
        F: FnMut(ControlRequest) -> ControlResponse,
    {
        while !cancel.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if let Err(e) = handle_connection(stream, &mut dispatch) {
                        warn!(error = %e, "control connection failed");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!(error = %e, "control accept error");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), error = %e,
                      "failed to unlink control socket");
            }
        }
        info!("control plane stopped");
    }
}

fn handle_connection<F>(mut stream: UnixStream, dispatch: &mut F) -> Result<()>
where
    F: FnMut(ControlRequest) -> ControlResponse,
{
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;

    let mut buf = vec![0u8; MAX_FRAME];
    let n = stream
        .read(&mut buf)
        .map_err(|e| RewindError::ipc(format!("read failed: {}", e)))?;

    let response = match serde_json::from_slice::<ControlRequest>(&buf[..n]) {
        Ok(request) => {
            debug!(action = %request.action, path = %request.path, "control request received");
            dispatch(request)
        }
        Err(e) => {
            warn!(error = %e, "invalid control message");
            ControlResponse::err("Invalid message format")
        }
    };

    let payload = serde_json::to_vec(&response)?;
    stream
        .write_all(&payload)
        .map_err(|e| RewindError::ipc(format!("write failed: {}", e)))?;
    Ok(())
}

/// Send one request to a daemon and wait for its response
pub fn send_request_to(socket_path: &Path, request: &ControlRequest) -> Result<ControlResponse> {
    let mut stream = UnixStream::connect(socket_path).map_err(|e| {
        RewindError::ipc(format!(
            "could not connect to the rewind daemon at {:?}: {}",
            socket_path, e
        ))
    })?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;

    let payload = serde_json::to_vec(request)?;
    stream
        .write_all(&payload)
        .map_err(|e| RewindError::ipc(format!("send failed: {}", e)))?;
    stream
        .shutdown(std::net::Shutdown::Write)
        .map_err(|e| RewindError::ipc(format!("shutdown failed: {}", e)))?;

    // The server closes after its single write; status payloads can
    // exceed the request frame, so read to EOF.
    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .map_err(|e| RewindError::ipc(format!("receive failed: {}", e)))?;

    Ok(serde_json::from_slice(&raw)?)
}

/// [`send_request_to`] against the default socket
pub fn send_request(request: &ControlRequest) -> Result<ControlResponse> {
    send_request_to(Path::new(SOCKET_PATH), request)
}

/// Convenience constructor for a request
pub fn request(action: &str, path: &str) -> ControlRequest {
    ControlRequest {
        action: action.to_string(),
        path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn spawn_server(
        socket: PathBuf,
        cancel: Arc<AtomicBool>,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let server = ControlServer::bind(&socket).unwrap();
            server.serve(&cancel, |req| match req.action.as_str() {
                "status" => ControlResponse::ok(r#"{"is_running":true}"#),
                "add" => ControlResponse::ok(format!("added {}", req.path)),
                other => ControlResponse::err(format!("Unknown action: {}", other)),
            });
        })
    }

    #[test]
    fn test_request_response_round_trip() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("ctl.sock");
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = spawn_server(socket.clone(), Arc::clone(&cancel));

        // Wait for the listener to come up.
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let response = send_request_to(&socket, &request("add", "/some/project")).unwrap();
        assert!(response.success);
        assert_eq!(response.message, "added /some/project");

        let response = send_request_to(&socket, &request("bogus", "")).unwrap();
        assert!(!response.success);
        assert!(response.message.contains("Unknown action"));

        cancel.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(!socket.exists());
    }

    #[test]
    fn test_connect_failure_is_ipc_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nobody.sock");
        assert!(matches!(
            send_request_to(&missing, &request("status", "")),
            Err(RewindError::Ipc(_))
        ));
    }

    #[test]
    fn test_legacy_request_deserializes_without_path() {
        let request: ControlRequest = serde_json::from_str(r#"{"action":"stop"}"#).unwrap();
        assert_eq!(request.action, "stop");
        assert_eq!(request.path, "");
    }
}
