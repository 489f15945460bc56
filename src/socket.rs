//! Unix-socket endpoint lifecycle: path derivation, bind/listen (server
//! mode) or connect (worker mode), stale-socket recovery, same-UID peer
//! authentication, and per-connection timeouts.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use nix::unistd::Uid;

/// `AF_UNIX` socket addresses are capped at this many bytes on Linux,
/// including the terminating NUL that `sun_path` requires.
const SOCKADDR_PATH_LIMIT: usize = 108;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(60);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// An endpoint ready for the accept loop (server mode) or the worker loop
/// (worker mode).
pub struct SocketEndpoint {
    pub path: PathBuf,
    /// `true` if this process created the filesystem entry and therefore
    /// owns cleanup; worker-mode endpoints never unlink.
    pub owns_entry: bool,
    kind: EndpointKind,
}

enum EndpointKind {
    Listening(UnixListener),
    Connected(UnixStream),
}

/// Derive the canonical server socket path from `$XDG_RUNTIME_DIR`.
pub fn default_socket_path() -> Result<PathBuf> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .ok()
        .filter(|v| !v.is_empty())
        .context("XDG_RUNTIME_DIR is not set")?;
    let path = PathBuf::from(runtime_dir).join("weave").join("weave.sock");
    check_path_len(&path)?;
    Ok(path)
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= SOCKADDR_PATH_LIMIT {
        bail!("socket path too long for AF_UNIX ({len} >= {SOCKADDR_PATH_LIMIT} bytes): {}", path.display());
    }
    Ok(())
}

/// `true` if a connect attempt against `path` fails the way a dead peer's
/// abandoned socket file fails (connection refused or no such file).
fn probe_is_stale(path: &Path) -> bool {
    match UnixStream::connect(path) {
        Ok(_) => false,
        Err(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
        ),
    }
}

impl SocketEndpoint {
    /// Create and bind a listening endpoint at `path`, per the five-step
    /// create protocol: ensure the directory, probe for staleness, bind
    /// (retrying once after unlinking a stale entry), then tighten modes.
    pub fn create(path: &Path) -> Result<Self> {
        check_path_len(path)?;

        let dir = path
            .parent()
            .context("socket path has no parent directory")?;
        ensure_dir_mode_0700(dir)?;

        if path.exists() {
            if probe_is_stale(path) {
                tracing::info!(path = %path.display(), "removing stale socket");
                fs::remove_file(path).context("failed to remove stale socket")?;
            } else {
                bail!("another instance is already listening on {}", path.display());
            }
        }

        let listener = match UnixListener::bind(path) {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && probe_is_stale(path) => {
                fs::remove_file(path).context("failed to remove stale socket")?;
                UnixListener::bind(path).context("failed to bind socket after stale removal")?
            }
            Err(e) => return Err(e).context("failed to bind socket"),
        };

        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .context("failed to set socket file mode")?;

        Ok(SocketEndpoint {
            path: path.to_path_buf(),
            owns_entry: true,
            kind: EndpointKind::Listening(listener),
        })
    }

    /// Connect to a socket created by a parent process (worker mode). The
    /// returned endpoint does not own the filesystem entry.
    pub fn connect(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            bail!("socket path must not be empty");
        }
        check_path_len(path)?;
        let stream = UnixStream::connect(path)
            .with_context(|| format!("failed to connect to {}", path.display()))?;
        Ok(SocketEndpoint {
            path: path.to_path_buf(),
            owns_entry: false,
            kind: EndpointKind::Connected(stream),
        })
    }

    /// Accept one connection (server mode only).
    pub fn accept(&self) -> io::Result<UnixStream> {
        match &self.kind {
            EndpointKind::Listening(listener) => listener.accept().map(|(stream, _)| stream),
            EndpointKind::Connected(_) => {
                Err(io::Error::other("accept() called on a worker-mode endpoint"))
            }
        }
    }

    /// The pre-connected stream (worker mode only).
    pub fn connected_stream(&self) -> io::Result<UnixStream> {
        match &self.kind {
            EndpointKind::Connected(stream) => stream.try_clone(),
            EndpointKind::Listening(_) => {
                Err(io::Error::other("connected_stream() called on a server-mode endpoint"))
            }
        }
    }

    /// Unlink the socket file, if this endpoint created it.
    pub fn cleanup(&self) {
        if self.owns_entry {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn ensure_dir_mode_0700(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) => {
            if !meta.is_dir() {
                bail!("{} exists and is not a directory", dir.display());
            }
            let mode = meta.permissions().mode() & 0o777;
            if mode != 0o700 {
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
                    .context("failed to tighten socket directory permissions")?;
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).context("failed to create socket directory")?;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
                .context("failed to set socket directory permissions")?;
        }
        Err(e) => return Err(e).context("failed to stat socket directory"),
    }
    Ok(())
}

/// Reject a connection unless its kernel-verified UID matches ours.
/// Rejections are logged at debug level only, never info or above, so
/// unauthorized probes cannot flood the operator's logs.
pub fn authenticate_peer(stream: &UnixStream) -> Result<bool> {
    let cred = getsockopt(stream, PeerCredentials).context("failed to read peer credentials")?;
    let our_uid = Uid::effective();
    if cred.uid() != our_uid.as_raw() {
        tracing::debug!(peer_uid = cred.uid(), our_uid = our_uid.as_raw(), "rejecting connection from foreign uid");
        return Ok(false);
    }
    Ok(true)
}

/// Apply the per-connection receive/send timeouts. A zero duration leaves
/// the corresponding timeout unchanged.
pub fn set_timeouts(stream: &UnixStream, recv: Duration, send: Duration) -> io::Result<()> {
    if !recv.is_zero() {
        stream.set_read_timeout(Some(recv))?;
    }
    if !send.is_zero() {
        stream.set_write_timeout(Some(send))?;
    }
    Ok(())
}

impl Drop for SocketEndpoint {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener as StdListener;

    #[test]
    fn stale_socket_is_removed_and_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.sock");

        // Create a listener, then drop it without unlinking (simulating a crash).
        {
            let listener = StdListener::bind(&path).unwrap();
            drop(listener);
        }
        assert!(path.exists());

        let endpoint = SocketEndpoint::create(&path).expect("stale socket should be replaced");
        assert!(endpoint.owns_entry);
        assert!(path.exists());
    }

    #[test]
    fn live_socket_blocks_a_second_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.sock");

        let _first = SocketEndpoint::create(&path).unwrap();
        let result = SocketEndpoint::create(&path);
        assert!(result.is_err());
    }

    #[test]
    fn cleanup_unlinks_owned_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.sock");
        let endpoint = SocketEndpoint::create(&path).unwrap();
        endpoint.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn connect_mode_does_not_own_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.sock");
        let server = SocketEndpoint::create(&path).unwrap();

        let worker = SocketEndpoint::connect(&path).unwrap();
        assert!(!worker.owns_entry);
        worker.cleanup();
        assert!(path.exists());

        drop(server);
        assert!(!path.exists());
    }

    #[test]
    fn connect_to_nonexistent_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.sock");
        assert!(SocketEndpoint::connect(&path).is_err());
    }

    #[test]
    fn authenticate_accepts_same_uid_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.sock");
        let endpoint = SocketEndpoint::create(&path).unwrap();

        let client = UnixStream::connect(&path).unwrap();
        let (server_side, _) = match &endpoint.kind {
            EndpointKind::Listening(listener) => listener.accept().unwrap(),
            _ => unreachable!(),
        };
        drop(client);

        assert!(authenticate_peer(&server_side).unwrap());
    }
}
