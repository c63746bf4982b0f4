//! The Unix domain socket server (§4.F).
//!
//! One client connection is one `tokio::net::UnixStream` split into owned
//! halves: the write half sits in the client's `Slab` entry, the read half
//! is handed to a [`futures_util::stream::FuturesUnordered`] future that
//! reads exactly one frame and returns the half so the caller can requeue
//! it — keeping every client's next-frame wait inside the one `select!`
//! the main loop drives, with no per-connection task.

mod client;

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use dsme_core::{ClientId, PeerCredentials};
use dsme_wire::{Frame, WireError};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use nix::sys::socket::{setsockopt, sockopt};
use slab::Slab;
use thiserror::Error;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

pub use client::ClientHandle;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to bind socket at {path:?}: {source}")]
    Bind { path: PathBuf, source: std::io::Error },

    #[error("failed to set socket permissions on {path:?}: {source}")]
    Permissions { path: PathBuf, source: std::io::Error },

    #[error("no client with handle {0}")]
    UnknownClient(ClientId),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type ReadOutcome = (ClientId, OwnedReadHalf, Result<Frame, WireError>);
type ReadFuture = Pin<Box<dyn Future<Output = ReadOutcome>>>;

const FRAME_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Outcome of [`SocketServer::next_event`] — the one thing the lifecycle
/// loop's `select!` actually matches on.
pub enum SocketEvent {
    Accepted(ClientId),
    Frame(ClientId, Result<Frame, WireError>),
    AcceptFailed(std::io::Error),
    /// No in-flight reads and no pending accept to report — can only
    /// happen transiently; callers should just loop back into `select!`.
    Idle,
}

pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
    clients: Slab<ClientHandle>,
    reads: FuturesUnordered<ReadFuture>,
}

impl SocketServer {
    /// Binds the listening socket at `path`, setting mode 0646 (§4.F) and
    /// enabling `SO_PASSCRED` so accepted connections carry peer
    /// credentials.
    pub fn bind(path: &Path) -> Result<Self, ProtocolError> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .map_err(|source| ProtocolError::Bind { path: path.to_path_buf(), source })?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(crate::env::SOCKET_MODE))
            .map_err(|source| ProtocolError::Permissions { path: path.to_path_buf(), source })?;
        // SAFETY: `listener` owns a valid socket fd for the duration of
        // this call.
        let _ = setsockopt(&listener, sockopt::PassCred, &true);
        Ok(SocketServer { listener, path: path.to_path_buf(), clients: Slab::new(), reads: FuturesUnordered::new() })
    }

    pub async fn accept(&mut self) -> std::io::Result<(UnixStream, tokio::net::unix::SocketAddr)> {
        self.listener.accept().await
    }

    /// Waits for whichever happens first: a new connection or the next
    /// frame from an already-connected client. A single combined wait point
    /// so the lifecycle loop's top-level `select!` only ever borrows
    /// `self` once per socket source, instead of racing `accept` and
    /// `next_frame` as separate branches (which would double-borrow).
    pub async fn next_event(&mut self) -> SocketEvent {
        if self.reads.is_empty() {
            return match self.listener.accept().await {
                Ok((stream, _addr)) => SocketEvent::Accepted(self.on_accept(stream)),
                Err(source) => SocketEvent::AcceptFailed(source),
            };
        }
        tokio::select! {
            accepted = self.listener.accept() => match accepted {
                Ok((stream, _addr)) => SocketEvent::Accepted(self.on_accept(stream)),
                Err(source) => SocketEvent::AcceptFailed(source),
            },
            frame = self.next_frame() => match frame {
                Some((id, result)) => SocketEvent::Frame(id, result),
                None => SocketEvent::Idle,
            },
        }
    }

    /// Registers a freshly accepted connection and arms its first read.
    pub fn on_accept(&mut self, stream: UnixStream) -> ClientId {
        let credentials = peer_credentials(&stream).unwrap_or(PeerCredentials::UNKNOWN);
        let (read_half, write_half) = stream.into_split();
        let key = self.clients.insert(ClientHandle::new(write_half, credentials));
        let id = ClientId::from(key);
        self.arm_read(id, read_half);
        id
    }

    fn arm_read(&mut self, id: ClientId, read_half: OwnedReadHalf) {
        let fut: ReadFuture = Box::pin(async move {
            let mut read_half = read_half;
            let result = dsme_wire::read_frame(&mut read_half, FRAME_TIMEOUT).await;
            (id, read_half, result)
        });
        self.reads.push(fut);
    }

    /// Awaits the next frame from any client. Re-arms that client's read
    /// future before returning unless the frame indicated disconnection.
    pub async fn next_frame(&mut self) -> Option<(ClientId, Result<Frame, WireError>)> {
        let (id, read_half, result) = self.reads.next().await?;
        if result.is_ok() && self.clients.contains(id.index()) {
            self.arm_read(id, read_half);
        }
        Some((id, result))
    }

    pub fn credentials(&self, id: ClientId) -> Option<PeerCredentials> {
        self.clients.get(id.index()).map(|c| c.credentials)
    }

    pub async fn send(
        &mut self,
        id: ClientId,
        type_id: u32,
        body: &[u8],
        extra: Option<&[u8]>,
    ) -> Result<(), ProtocolError> {
        let client = self.clients.get_mut(id.index()).ok_or(ProtocolError::UnknownClient(id))?;
        client.send(type_id, body, extra).await.map_err(ProtocolError::from)
    }

    /// Sends to every connected client, skipping (and disconnecting) any
    /// whose write fails.
    pub async fn broadcast(&mut self, type_id: u32, body: &[u8], extra: Option<&[u8]>) {
        self.broadcast_filtered(None, type_id, body, extra).await
    }

    /// Sends to every connected client except `except` (§4.F "from-socket
    /// broadcast": the source client is suppressed from its own fan-out).
    pub async fn broadcast_except(&mut self, except: ClientId, type_id: u32, body: &[u8], extra: Option<&[u8]>) {
        self.broadcast_filtered(Some(except), type_id, body, extra).await
    }

    async fn broadcast_filtered(
        &mut self,
        except: Option<ClientId>,
        type_id: u32,
        body: &[u8],
        extra: Option<&[u8]>,
    ) {
        let ids: Vec<ClientId> =
            self.clients.iter().map(|(k, _)| ClientId::from(k)).filter(|id| Some(*id) != except).collect();
        for id in ids {
            if self.send(id, type_id, body, extra).await.is_err() {
                self.disconnect(id);
            }
        }
    }

    pub fn disconnect(&mut self, id: ClientId) {
        self.clients.remove(id.index());
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn peer_credentials(stream: &UnixStream) -> std::io::Result<PeerCredentials> {
    let cred = nix::sys::socket::getsockopt(stream, sockopt::PeerCredentials)
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
    Ok(PeerCredentials { pid: cred.pid(), uid: cred.uid(), gid: cred.gid() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_and_round_trip_a_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsme-test.sock");
        let mut server = SocketServer::bind(&path).unwrap();

        let connector = UnixStream::connect(&path);
        let (client_stream, accepted) = tokio::join!(connector, server.accept());
        let mut client_stream = client_stream.unwrap();
        let (stream, _addr) = accepted.unwrap();
        let id = server.on_accept(stream);
        assert_eq!(server.client_count(), 1);

        dsme_wire::write_frame(&mut client_stream, 0x0001_0001, &[], None, FRAME_TIMEOUT).await.unwrap();
        let (got_id, frame) = server.next_frame().await.unwrap();
        assert_eq!(got_id, id);
        assert_eq!(frame.unwrap().type_id, 0x0001_0001);
    }

    #[tokio::test]
    async fn send_to_unknown_client_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsme-test2.sock");
        let mut server = SocketServer::bind(&path).unwrap();
        let bogus = ClientId::from(7);
        assert!(server.send(bogus, 1, &[], None).await.is_err());
    }
}
