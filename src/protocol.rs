//! Command framing shared by the dispatcher, the storage nodes and the client.
//!
//! A request is a single frame `<verb> <arg1> [<arg2>]`. Senders always pad the
//! frame with NUL bytes up to [`CHUNK_SIZE`] and emit it with one write, so the
//! receiver can consume exactly one frame before any payload chunk follows.
//! Payload bytes themselves are framed by [`crate::relay`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, StoreError};

/// Size of a command frame and maximum size of a payload chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Upper bound for a single status read on the client side.
pub const STATUS_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Upload,
    Download,
    Remove,
    ArchiveByExtension,
    ListDirectory,
}

impl Verb {
    /// Token emitted on the wire.
    pub fn token(self) -> &'static str {
        match self {
            Verb::Upload => "ufile",
            Verb::Download => "dfile",
            Verb::Remove => "rmfile",
            Verb::ArchiveByExtension => "dtar",
            Verb::ListDirectory => "display",
        }
    }
}

impl FromStr for Verb {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ufile" | "upload" => Ok(Verb::Upload),
            "dfile" | "download" => Ok(Verb::Download),
            "rmfile" | "remove" => Ok(Verb::Remove),
            "dtar" | "archive-by-extension" => Ok(Verb::ArchiveByExtension),
            "display" | "list-directory" => Ok(Verb::ListDirectory),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A parsed request. `arg1` is required by every verb, `arg2` only matters
/// for uploads (destination directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub arg1: String,
    pub arg2: Option<String>,
}

impl Command {
    pub fn new(verb: Verb, arg1: impl Into<String>) -> Self {
        Self {
            verb,
            arg1: arg1.into(),
            arg2: None,
        }
    }

    pub fn with_arg2(mut self, arg2: impl Into<String>) -> Self {
        let arg2 = arg2.into();
        self.arg2 = if arg2.is_empty() { None } else { Some(arg2) };
        self
    }

    /// Textual form without padding.
    pub fn line(&self) -> String {
        match &self.arg2 {
            Some(arg2) => format!("{} {} {}", self.verb, self.arg1, arg2),
            None => format!("{} {}", self.verb, self.arg1),
        }
    }

    /// Padded frame, exactly [`CHUNK_SIZE`] bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let line = self.line();
        if line.len() > CHUNK_SIZE {
            return Err(StoreError::MalformedFrame(format!(
                "command of {} bytes exceeds the {} byte frame",
                line.len(),
                CHUNK_SIZE
            )));
        }
        let mut frame = line.into_bytes();
        frame.resize(CHUNK_SIZE, 0);
        Ok(frame)
    }
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Command(Command),
    /// Well formed, but the verb is not part of the protocol.
    UnknownVerb(String),
}

pub fn parse_frame(bytes: &[u8]) -> Result<Frame> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|_| StoreError::MalformedFrame("frame is not valid UTF-8".to_string()))?;

    let mut parts = text.split_whitespace();
    let Some(verb) = parts.next() else {
        return Err(StoreError::MalformedFrame("empty frame".to_string()));
    };
    let Ok(verb) = verb.parse::<Verb>() else {
        return Ok(Frame::UnknownVerb(verb.to_string()));
    };
    let Some(arg1) = parts.next() else {
        return Err(StoreError::MalformedFrame(format!(
            "{} requires an argument",
            verb
        )));
    };

    let mut command = Command::new(verb, arg1);
    if let Some(arg2) = parts.next() {
        command = command.with_arg2(arg2);
    }
    Ok(Frame::Command(command))
}

/// Reads one frame. Returns `Ok(None)` once the peer has closed the
/// connection.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    // The frame may arrive in pieces. Keep reading until the padding starts,
    // then swallow whatever padding is still owed.
    while n < CHUNK_SIZE && !buf[..n].contains(&0) {
        let more = reader.read(&mut buf[n..]).await?;
        if more == 0 {
            break;
        }
        n += more;
    }
    if n < CHUNK_SIZE && buf[..n].contains(&0) {
        reader.read_exact(&mut buf[n..]).await?;
    }
    parse_frame(&buf[..n]).map(Some)
}

pub async fn write_command<W>(writer: &mut W, command: &Command) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = command.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Sends one status line, appending the newline when missing.
pub async fn write_status<W>(writer: &mut W, message: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = message.to_string();
    if !line.ends_with('\n') {
        line.push('\n');
    }
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Status that follows a payload travelling in the same direction. The settle
/// delay keeps the trailing short chunk and the status from arriving in the
/// same read on the other side.
pub async fn write_status_after_payload<W>(
    writer: &mut W,
    message: &str,
    settle: Duration,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.flush().await?;
    tokio::time::sleep(settle).await;
    write_status(writer, message).await
}

/// Reads a single status reply with one read. An empty string means the peer
/// closed without answering.
pub async fn read_status<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; STATUS_BUFFER_SIZE];
    let n = reader.read(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}
