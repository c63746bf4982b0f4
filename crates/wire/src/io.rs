use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{Frame, FrameHeader, HEADER_LEN};
use crate::error::WireError;

/// Read one complete frame, bounded by `timeout`. Returns
/// [`WireError::ConnectionClosed`] on a clean EOF before any header bytes
/// arrive, and [`WireError::Timeout`] if `timeout` elapses first.
pub async fn read_frame<R>(reader: &mut R, timeout: Duration) -> Result<Frame, WireError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_frame_inner(reader)).await.map_err(|_| WireError::Timeout)?
}

async fn read_frame_inner<R>(reader: &mut R) -> Result<Frame, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed)
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let header = FrameHeader::from_bytes(&header_buf);
    header.validate()?;

    let rest_len = header.length as usize - HEADER_LEN;
    let mut rest = vec![0u8; rest_len];
    reader.read_exact(&mut rest).await.map_err(WireError::Io)?;

    Frame::decode(header, &rest)
}

/// Write one complete frame, bounded by `timeout`.
pub async fn write_frame<W>(
    writer: &mut W,
    type_id: u32,
    body: &[u8],
    extra: Option<&[u8]>,
    timeout: Duration,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = Frame::encode(type_id, body, extra)?;
    tokio::time::timeout(timeout, async {
        writer.write_all(&bytes).await.map_err(WireError::Io)?;
        writer.flush().await.map_err(WireError::Io)
    })
    .await
    .map_err(|_| WireError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (mut a, mut b) = duplex(1024);
        write_frame(&mut a, 0x42, b"hello", Some(b"extra"), Duration::from_secs(1))
            .await
            .unwrap();
        let frame = read_frame(&mut b, Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.type_id, 0x42);
        let (body, extra) = frame.split_payload(5).unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(extra, Some(b"extra".as_slice()));
    }

    #[tokio::test]
    async fn read_on_closed_stream_is_connection_closed() {
        let (a, mut b) = duplex(1024);
        drop(a);
        let err = read_frame(&mut b, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[tokio::test]
    async fn read_times_out_when_nothing_arrives() {
        let (_a, mut b) = duplex(1024);
        let err = read_frame(&mut b, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, WireError::Timeout));
    }
}
