//! Storage node: serves the commands for a single extension out of a local
//! root. The dispatcher runs the same handlers for the extension it keeps
//! itself.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::messages;
use crate::protocol::{self, Command, Frame, Verb};
use crate::relay::{self, Marker};
use crate::store::LocalStore;

#[derive(Debug, Clone)]
pub struct StorageNode {
    store: LocalStore,
    settle: Duration,
}

impl StorageNode {
    pub fn new(store: LocalStore, settle: Duration) -> Self {
        Self { store, settle }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            LocalStore::new(config.root.clone(), config.extension.clone()),
            config.settle(),
        )
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Command loop for one connection. Returns when the peer closes; a
    /// malformed frame ends the session with an error.
    pub async fn serve_connection<S>(&self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(frame) = protocol::read_frame(&mut stream).await? {
            match frame {
                Frame::Command(command) => self.handle(&mut stream, &command).await?,
                Frame::UnknownVerb(verb) => {
                    tracing::warn!(%verb, "rejecting unknown command");
                    protocol::write_status(&mut stream, messages::INVALID_COMMAND).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn handle<S>(&self, stream: &mut S, command: &Command) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::info!(command = %command.line(), extension = %self.store.extension(), "handling");
        match command.verb {
            Verb::Upload => {
                let dest = command.arg2.as_deref().unwrap_or("");
                self.upload(stream, &command.arg1, dest).await
            }
            Verb::Download => self.download(stream, &command.arg1).await,
            Verb::Remove => self.remove(stream, &command.arg1).await,
            Verb::ArchiveByExtension => self.archive(stream, &command.arg1).await,
            Verb::ListDirectory => self.list(stream, &command.arg1).await,
        }
    }

    async fn upload<S>(&self, stream: &mut S, name: &str, dest: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.store.create_file(dest, name).await {
            Ok((path, mut file)) => {
                let bytes = relay::relay(stream, &mut file, Marker::Strip).await?;
                tracing::info!(path = %path.display(), bytes, "upload stored");
                protocol::write_status(stream, &messages::uploaded(name)).await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "upload target unavailable");
                // Keep the session aligned with the client.
                relay::drain(stream).await?;
                let target = format!("{}/{}", dest.trim_end_matches('/'), name);
                protocol::write_status(stream, &messages::cannot_write(&target)).await?;
            }
        }
        Ok(())
    }

    // A missing file still produces an (empty) payload and a status so the
    // caller never waits on a reply that is not coming.
    async fn download<S>(&self, stream: &mut S, name: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.store.open_file(name).await {
            Ok(mut file) => {
                let bytes = relay::send_payload(&mut file, stream).await?;
                tracing::info!(name, bytes, "download sent");
                protocol::write_status_after_payload(
                    stream,
                    &messages::downloaded(name),
                    self.settle,
                )
                .await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "download source unavailable");
                relay::send_empty(stream).await?;
                protocol::write_status_after_payload(
                    stream,
                    &messages::not_found(name),
                    self.settle,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn remove<S>(&self, stream: &mut S, name: &str) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let reply = match self.store.remove_file(name).await {
            Ok(()) => messages::deleted(name),
            Err(e) => {
                tracing::warn!(error = %e, "remove failed");
                messages::cannot_delete(name)
            }
        };
        protocol::write_status(stream, &reply).await?;
        Ok(())
    }

    async fn archive<S>(&self, stream: &mut S, extension: &str) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let reply = if extension != self.store.extension() {
            messages::unsupported_extension(extension)
        } else {
            match self.store.archive().await {
                Ok(path) => {
                    tracing::info!(archive = %path.display(), "archive created");
                    messages::archived(extension)
                }
                Err(e) => {
                    tracing::error!(error = %e, "archive failed");
                    messages::archive_failed(extension)
                }
            }
        };
        protocol::write_status(stream, &reply).await?;
        Ok(())
    }

    async fn list<S>(&self, stream: &mut S, path: &str) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let names = self.store.list_basenames(path).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "listing failed");
            Vec::new()
        });
        let reply = if names.is_empty() {
            messages::no_matching_files(self.store.extension())
        } else {
            names.join("\n")
        };
        protocol::write_status(stream, &reply).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::protocol::CHUNK_SIZE;
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    const SETTLE: Duration = Duration::from_millis(20);

    fn spawn_node(dir: &TempDir) -> DuplexStream {
        let node = StorageNode::new(LocalStore::new(dir.path(), ".txt"), SETTLE);
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let _ = node.serve_connection(server).await;
        });
        client
    }

    async fn upload(client: &mut DuplexStream, name: &str, dest: &str, data: &[u8]) -> String {
        let command = Command::new(Verb::Upload, name).with_arg2(dest);
        protocol::write_command(client, &command).await.unwrap();
        let mut src = data;
        relay::send_payload(&mut src, client).await.unwrap();
        protocol::read_status(client).await.unwrap()
    }

    async fn download(client: &mut DuplexStream, name: &str) -> (Vec<u8>, String) {
        protocol::write_command(client, &Command::new(Verb::Download, name))
            .await
            .unwrap();
        let mut data = Vec::new();
        relay::relay(client, &mut data, Marker::Strip).await.unwrap();
        let status = protocol::read_status(client).await.unwrap();
        (data, status)
    }

    async fn simple(client: &mut DuplexStream, verb: Verb, arg: &str) -> String {
        protocol::write_command(client, &Command::new(verb, arg))
            .await
            .unwrap();
        protocol::read_status(client).await.unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_returns_the_same_bytes() {
        let dir = TempDir::new().unwrap();
        let mut client = spawn_node(&dir);
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 200) as u8 + 1).collect();

        let status = upload(&mut client, "notes.txt", "docs", &data).await;
        assert_eq!(status, "File notes.txt successfully uploaded\n");
        assert_eq!(std::fs::read(dir.path().join("docs/notes.txt")).unwrap(), data);

        let (got, status) = download(&mut client, "docs/notes.txt").await;
        assert_eq!(got, data);
        assert_eq!(status, "File docs/notes.txt successfully downloaded\n");
    }

    #[tokio::test]
    async fn missing_download_yields_empty_payload_and_status() {
        let dir = TempDir::new().unwrap();
        let mut client = spawn_node(&dir);
        let (got, status) = download(&mut client, "ghost.txt").await;
        assert!(got.is_empty());
        assert!(status.contains("not found"));
    }

    #[tokio::test]
    async fn remove_distinguishes_success_from_failure() {
        let dir = TempDir::new().unwrap();
        let mut client = spawn_node(&dir);
        upload(&mut client, "a.txt", "", b"x").await;

        assert_eq!(
            simple(&mut client, Verb::Remove, "a.txt").await,
            "File a.txt deleted successfully.\n"
        );
        assert_eq!(
            simple(&mut client, Verb::Remove, "a.txt").await,
            "Error: Unable to delete file a.txt.\n"
        );
    }

    #[tokio::test]
    async fn archive_checks_the_extension() {
        let dir = TempDir::new().unwrap();
        let mut client = spawn_node(&dir);
        upload(&mut client, "a.txt", "deep/er", b"abc").await;

        let status = simple(&mut client, Verb::ArchiveByExtension, ".txt").await;
        assert_eq!(status, "Tar file for .txt files created successfully.\n");
        assert!(dir.path().join("txt_list.tar").exists());

        let status = simple(&mut client, Verb::ArchiveByExtension, ".pdf").await;
        assert_eq!(status, "Error: Unsupported file type .pdf\n");
    }

    struct BrokenArchiver;

    impl crate::store::Archiver for BrokenArchiver {
        fn archive(
            &self,
            _base: &std::path::Path,
            _sources: &[std::path::PathBuf],
            _dest: &std::path::Path,
        ) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
    }

    #[tokio::test]
    async fn archiver_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path(), ".txt")
            .with_archiver(std::sync::Arc::new(BrokenArchiver));
        let node = StorageNode::new(store, SETTLE);
        let (mut client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let _ = node.serve_connection(server).await;
        });

        assert_eq!(
            simple(&mut client, Verb::ArchiveByExtension, ".txt").await,
            "Error: Failed to create tar file for .txt files.\n"
        );
    }

    #[tokio::test]
    async fn list_reports_names_or_an_explicit_empty_message() {
        let dir = TempDir::new().unwrap();
        let mut client = spawn_node(&dir);
        upload(&mut client, "b.txt", "docs", b"1").await;
        upload(&mut client, "a.txt", "docs", b"2").await;

        assert_eq!(
            simple(&mut client, Verb::ListDirectory, "docs").await,
            "a.txt\nb.txt\n"
        );
        assert_eq!(
            simple(&mut client, Verb::ListDirectory, "nowhere").await,
            "No .txt files found in the specified directory.\n"
        );
    }

    #[tokio::test]
    async fn unknown_verb_keeps_the_session_open() {
        let dir = TempDir::new().unwrap();
        let mut client = spawn_node(&dir);

        let mut frame = b"copy a.txt b.txt".to_vec();
        frame.resize(CHUNK_SIZE, 0);
        client.write_all(&frame).await.unwrap();
        assert_eq!(
            protocol::read_status(&mut client).await.unwrap(),
            "Invalid command\n"
        );

        assert!(simple(&mut client, Verb::ListDirectory, "x")
            .await
            .starts_with("No .txt files"));
    }

    #[tokio::test]
    async fn malformed_frame_ends_the_session() {
        let dir = TempDir::new().unwrap();
        let node = StorageNode::new(LocalStore::new(dir.path(), ".txt"), SETTLE);
        let (mut client, server) = duplex(4 * CHUNK_SIZE);
        let session = tokio::spawn(async move { node.serve_connection(server).await });

        client.write_all(&[0u8; CHUNK_SIZE]).await.unwrap();
        let result = session.await.unwrap();
        assert!(matches!(result, Err(StoreError::MalformedFrame(_))));

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
