//! Chunked payload transfer.
//!
//! Payloads are not length prefixed: the sender emits chunks of at most
//! [`CHUNK_SIZE`] bytes and the first chunk shorter than that ends the
//! transfer. Empty payloads and payloads that are an exact multiple of the
//! chunk size are closed with a single `0x00` marker chunk. All of that is
//! contained here so callers only ever move whole payloads.

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::CHUNK_SIZE;

/// Terminating chunk used when no short data chunk is available.
///
/// The marker is indistinguishable from a short data chunk holding a single
/// NUL byte: a payload whose last chunk is exactly `[0x00]` loses that byte
/// on the receiving side (a one-byte `\0` file arrives empty, a 1025-byte
/// file ending in `\0` arrives as 1024 bytes).
pub const END_MARKER: [u8; 1] = [0];

/// What to do with the end marker when it passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The destination stores bytes: the marker carries no data.
    Strip,
    /// The destination is another framed peer: forward chunks verbatim.
    Keep,
}

/// Which side of a [`relay_sides`] call failed.
#[derive(Debug)]
pub enum RelayError {
    Read(io::Error),
    /// `complete` is set when the source payload had already ended, so there
    /// is nothing left to drain from it.
    Write { error: io::Error, complete: bool },
}

impl From<RelayError> for io::Error {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Read(error) | RelayError::Write { error, .. } => error,
        }
    }
}

fn is_end_marker(chunk: &[u8]) -> bool {
    chunk == END_MARKER
}

/// Copies one framed payload from `src` to `dst`, returning the number of
/// data bytes moved.
///
/// Every `read` is treated as one chunk. If `src` closes before a short chunk
/// was seen and `marker` is [`Marker::Keep`], a marker is emitted so that the
/// reader downstream still terminates.
pub async fn relay<R, W>(src: &mut R, dst: &mut W, marker: Marker) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    relay_sides(src, dst, marker).await.map_err(io::Error::from)
}

/// [`relay`] for callers that must tell a failing source from a failing
/// destination.
pub async fn relay_sides<R, W>(
    src: &mut R,
    dst: &mut W,
    marker: Marker,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let write_failed =
        |complete: bool| move |error: io::Error| RelayError::Write { error, complete };
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = src.read(&mut buf).await.map_err(RelayError::Read)?;
        if n == 0 {
            if marker == Marker::Keep {
                dst.write_all(&END_MARKER).await.map_err(write_failed(true))?;
            }
            break;
        }

        let chunk = &buf[..n];
        if is_end_marker(chunk) {
            if marker == Marker::Keep {
                dst.write_all(chunk).await.map_err(write_failed(true))?;
            }
            break;
        }

        let last = n < CHUNK_SIZE;
        dst.write_all(chunk).await.map_err(write_failed(last))?;
        total += n as u64;
        if last {
            break;
        }
    }

    dst.flush().await.map_err(write_failed(true))?;
    Ok(total)
}

/// Frames an unframed source (a file, a byte slice) that ends at EOF.
pub async fn send_payload<R, W>(src: &mut R, dst: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = fill_chunk(src, &mut buf).await?;
        if n == 0 {
            dst.write_all(&END_MARKER).await?;
            break;
        }
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
        if n < CHUNK_SIZE {
            break;
        }
    }

    dst.flush().await?;
    Ok(total)
}

/// Discards one framed payload, keeping the connection in step with the peer.
pub async fn drain<R>(src: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    relay(src, &mut io::sink(), Marker::Strip).await
}

/// Sends an empty payload: just the marker.
pub async fn send_empty<W>(dst: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    dst.write_all(&END_MARKER).await?;
    dst.flush().await
}

// Files may hand back short reads before EOF, so keep reading until the
// chunk is full or the source is exhausted.
async fn fill_chunk<R>(src: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
