use dsme_core::PeerCredentials;
use dsme_wire::WireError;
use tokio::net::unix::OwnedWriteHalf;

const FRAME_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// The half of a client connection owned by the socket server's `Slab`.
/// The read half lives transiently inside an in-flight future instead
/// (see `mod.rs`).
pub struct ClientHandle {
    write_half: OwnedWriteHalf,
    pub credentials: PeerCredentials,
}

impl ClientHandle {
    pub fn new(write_half: OwnedWriteHalf, credentials: PeerCredentials) -> Self {
        ClientHandle { write_half, credentials }
    }

    pub async fn send(&mut self, type_id: u32, body: &[u8], extra: Option<&[u8]>) -> Result<(), WireError> {
        dsme_wire::write_frame(&mut self.write_half, type_id, body, extra, FRAME_TIMEOUT).await
    }
}
