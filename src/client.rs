//! Programmatic client for the dispatcher. Each call sends one command over
//! the session's connection and returns the server's free-text reply.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{Result, StoreError};
use crate::messages;
use crate::protocol::{self, Command, Verb};
use crate::relay::{self, Marker};

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    async fn request(&mut self, command: Command) -> Result<String> {
        protocol::write_command(&mut self.stream, &command).await?;
        Ok(protocol::read_status(&mut self.stream).await?)
    }

    pub async fn upload_bytes(&mut self, name: &str, dest: &str, data: &[u8]) -> Result<String> {
        let command = Command::new(Verb::Upload, name).with_arg2(dest);
        protocol::write_command(&mut self.stream, &command).await?;
        let mut src = data;
        relay::send_payload(&mut src, &mut self.stream).await?;
        Ok(protocol::read_status(&mut self.stream).await?)
    }

    /// Uploads a local file under its basename into `dest` on the server.
    pub async fn upload_file(&mut self, path: &Path, dest: &str) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StoreError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
                )
            })?
            .to_string();
        let mut file = File::open(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;

        let command = Command::new(Verb::Upload, name).with_arg2(dest);
        protocol::write_command(&mut self.stream, &command).await?;
        relay::send_payload(&mut file, &mut self.stream).await?;
        Ok(protocol::read_status(&mut self.stream).await?)
    }

    /// Returns the payload and the status line that follows it.
    pub async fn download(&mut self, name: &str) -> Result<(Vec<u8>, String)> {
        protocol::write_command(&mut self.stream, &Command::new(Verb::Download, name)).await?;
        let mut data = Vec::new();
        relay::relay(&mut self.stream, &mut data, Marker::Strip).await?;
        let status = protocol::read_status(&mut self.stream).await?;
        Ok((data, status))
    }

    /// Downloads `name` into `dir`, never overwriting an existing file: a
    /// clash becomes `stem(1).ext`, `stem(2).ext`, ... Nothing is written
    /// when the server reports a failure, in which case the path is `None`.
    pub async fn download_to(
        &mut self,
        name: &str,
        dir: &Path,
    ) -> Result<(Option<PathBuf>, String)> {
        let (data, status) = self.download(name).await?;
        if data.is_empty() && messages::is_failure(&status) {
            return Ok((None, status));
        }
        let target = unique_destination(dir, name);
        tokio::fs::write(&target, &data)
            .await
            .map_err(|e| StoreError::io(&target, e))?;
        Ok((Some(target), status))
    }

    pub async fn remove(&mut self, name: &str) -> Result<String> {
        self.request(Command::new(Verb::Remove, name)).await
    }

    pub async fn archive(&mut self, extension: &str) -> Result<String> {
        self.request(Command::new(Verb::ArchiveByExtension, extension))
            .await
    }

    pub async fn list(&mut self, path: &str) -> Result<String> {
        self.request(Command::new(Verb::ListDirectory, path)).await
    }
}

pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let candidate = dir.join(&file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rfind('.') {
        Some(dot) if dot > 0 => file_name.split_at(dot),
        _ => (file_name.as_str(), ""),
    };
    (1..)
        .map(|n| dir.join(format!("{}({}){}", stem, n, extension)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_destination_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_destination(dir.path(), "docs/report.pdf"),
            dir.path().join("report.pdf")
        );

        std::fs::write(dir.path().join("report.pdf"), b"1").unwrap();
        std::fs::write(dir.path().join("report(1).pdf"), b"2").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "report.pdf"),
            dir.path().join("report(2).pdf")
        );

        std::fs::write(dir.path().join("Makefile"), b"3").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "Makefile"),
            dir.path().join("Makefile(1)")
        );
    }
}
