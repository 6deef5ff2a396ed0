//! Client facing front end.
//!
//! Every command is routed by extension: the dispatcher's own extension is
//! served from its local root through the regular node handlers, the others
//! are proxied byte for byte to the owning storage node over a fresh
//! connection. Listings fan out to every node and are merged in routing
//! order.

use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::DispatcherConfig;
use crate::error::{Result, StoreError};
use crate::messages;
use crate::node::StorageNode;
use crate::protocol::{self, Command, Frame, Verb};
use crate::relay::{self, Marker, RelayError};
use crate::routing::{NodeEntry, RoutedTarget, RoutingTable};
use crate::store::LocalStore;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    routing: RoutingTable,
    local: StorageNode,
    settle: Duration,
    node_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        routing: RoutingTable,
        root: impl Into<std::path::PathBuf>,
        settle: Duration,
        node_timeout: Duration,
    ) -> Self {
        let store = LocalStore::new(root, routing.local_extension().to_string());
        Self {
            routing,
            local: StorageNode::new(store, settle),
            settle,
            node_timeout,
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(
            config.routing_table(),
            config.root.clone(),
            config.settle(),
            config.node_timeout(),
        )
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn local_store(&self) -> &LocalStore {
        self.local.store()
    }

    /// Command loop for one client connection.
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
        match command.verb {
            Verb::Upload | Verb::Download | Verb::Remove => {
                match self.routing.resolve(&command.arg1) {
                    Ok(RoutedTarget::Local) => self.local.handle(stream, command).await,
                    Ok(RoutedTarget::Remote(id)) => self.proxy(stream, id, command).await,
                    Err(e) => {
                        tracing::info!(error = %e, "rejecting command");
                        let reply = messages::unsupported_file(&command.arg1);
                        self.fail(stream, command, &reply).await
                    }
                }
            }
            Verb::ArchiveByExtension => match self.routing.route_extension(&command.arg1) {
                Some(RoutedTarget::Local) => self.local.handle(stream, command).await,
                Some(RoutedTarget::Remote(id)) => self.proxy(stream, id, command).await,
                None => {
                    let reply = messages::unsupported_extension(&command.arg1);
                    protocol::write_status(stream, &reply).await?;
                    Ok(())
                }
            },
            Verb::ListDirectory => self.list_all(stream, &command.arg1).await,
        }
    }

    /// Replies with a failure while keeping the client in step: an upload's
    /// payload is consumed first, a download gets an empty payload first.
    async fn fail<S>(&self, stream: &mut S, command: &Command, reply: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match command.verb {
            Verb::Upload => {
                relay::drain(stream).await?;
                protocol::write_status(stream, reply).await?;
            }
            Verb::Download => {
                relay::send_empty(stream).await?;
                protocol::write_status_after_payload(stream, reply, self.settle).await?;
            }
            _ => protocol::write_status(stream, reply).await?,
        }
        Ok(())
    }

    async fn dial(&self, node: &NodeEntry) -> Result<TcpStream> {
        let unreachable = |reason: String| StoreError::NodeUnreachable {
            node: node.name.clone(),
            reason,
        };
        match timeout(self.node_timeout, TcpStream::connect(node.address)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(node = %node.name, error = %e, "cannot disable Nagle");
                }
                Ok(stream)
            }
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Err(_) => Err(unreachable("connect timed out".to_string())),
        }
    }

    /// Everything the node sends until it closes the connection.
    async fn read_reply(&self, node: &NodeEntry, upstream: &mut TcpStream) -> Result<Vec<u8>> {
        let mut reply = Vec::new();
        match timeout(self.node_timeout, upstream.read_to_end(&mut reply)).await {
            Ok(Ok(_)) => Ok(reply),
            Ok(Err(e)) => Err(StoreError::NodeUnreachable {
                node: node.name.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(StoreError::NodeUnreachable {
                node: node.name.clone(),
                reason: "reply timed out".to_string(),
            }),
        }
    }

    async fn proxy<S>(&self, stream: &mut S, id: usize, command: &Command) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(node) = self.routing.node(id) else {
            let reply = messages::unsupported_file(&command.arg1);
            return self.fail(stream, command, &reply).await;
        };

        let mut upstream = match self.dial(node).await {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!(error = %e, "proxy dial failed");
                return self
                    .fail(stream, command, &messages::node_unreachable(&node.name))
                    .await;
            }
        };
        if let Err(e) = protocol::write_command(&mut upstream, command).await {
            tracing::warn!(node = %node.name, error = %e, "forwarding command failed");
            return self
                .fail(stream, command, &messages::node_unreachable(&node.name))
                .await;
        }
        tracing::info!(node = %node.name, command = %command.line(), "proxying");

        match command.verb {
            Verb::Upload => {
                match relay::relay_sides(stream, &mut upstream, Marker::Keep).await {
                    Ok(bytes) => tracing::debug!(node = %node.name, bytes, "upload relayed"),
                    Err(RelayError::Read(e)) => return Err(e.into()),
                    Err(RelayError::Write { error, complete }) => {
                        tracing::warn!(node = %node.name, error = %error, "upload relay failed");
                        if !complete {
                            relay::drain(stream).await?;
                        }
                        let reply = messages::node_unreachable(&node.name);
                        protocol::write_status(stream, &reply).await?;
                        return Ok(());
                    }
                }
                if let Err(e) = upstream.shutdown().await {
                    tracing::warn!(node = %node.name, error = %e, "half-close failed");
                    let reply = messages::node_unreachable(&node.name);
                    protocol::write_status(stream, &reply).await?;
                    return Ok(());
                }
                self.forward_reply(stream, node, &mut upstream).await
            }
            _ => {
                if let Err(e) = upstream.shutdown().await {
                    tracing::warn!(node = %node.name, error = %e, "half-close failed");
                    return self
                        .fail(stream, command, &messages::node_unreachable(&node.name))
                        .await;
                }
                if command.verb == Verb::Download {
                    self.relay_download(stream, node, &mut upstream).await
                } else {
                    self.forward_reply(stream, node, &mut upstream).await
                }
            }
        }
    }

    async fn forward_reply<S>(
        &self,
        stream: &mut S,
        node: &NodeEntry,
        upstream: &mut TcpStream,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match self.read_reply(node, upstream).await {
            Ok(reply) if !reply.is_empty() => {
                stream.write_all(&reply).await?;
                stream.flush().await?;
            }
            Ok(_) => {
                tracing::warn!(node = %node.name, "node closed without a reply");
                protocol::write_status(stream, &messages::node_unreachable(&node.name)).await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "node reply lost");
                protocol::write_status(stream, &messages::node_unreachable(&node.name)).await?;
            }
        }
        Ok(())
    }

    async fn relay_download<S>(
        &self,
        stream: &mut S,
        node: &NodeEntry,
        upstream: &mut TcpStream,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let unreachable = messages::node_unreachable(&node.name);

        // Wait for the first chunk within the node timeout; after that the
        // transfer runs at whatever pace the node sets.
        let mut probe = [0u8; 1];
        let first = match timeout(self.node_timeout, upstream.peek(&mut probe)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timed out".to_string()),
        };
        if let Err(reason) = first {
            tracing::warn!(node = %node.name, %reason, "download did not start");
            relay::send_empty(stream).await?;
            protocol::write_status_after_payload(stream, &unreachable, self.settle).await?;
            return Ok(());
        }

        match relay::relay_sides(upstream, stream, Marker::Keep).await {
            Ok(bytes) => tracing::debug!(node = %node.name, bytes, "download relayed"),
            Err(RelayError::Read(e)) => {
                // Only full chunks went out so far, so a marker still closes
                // the payload cleanly.
                tracing::warn!(node = %node.name, error = %e, "download relay failed");
                relay::send_empty(stream).await?;
                protocol::write_status_after_payload(stream, &unreachable, self.settle).await?;
                return Ok(());
            }
            Err(RelayError::Write { error, .. }) => return Err(error.into()),
        }

        let reply = match self.read_reply(node, upstream).await {
            Ok(reply) if !reply.is_empty() => String::from_utf8_lossy(&reply).into_owned(),
            Ok(_) => {
                tracing::warn!(node = %node.name, "node closed without a status");
                unreachable
            }
            Err(e) => {
                tracing::warn!(error = %e, "download status lost");
                unreachable
            }
        };
        protocol::write_status_after_payload(stream, &reply, self.settle).await?;
        Ok(())
    }

    /// One node's share of a listing. Only names carrying the node's
    /// extension are kept, which also drops its "no files" text.
    async fn query_listing(&self, node: &NodeEntry, path: &str) -> Result<Vec<String>> {
        let mut upstream = self.dial(node).await?;
        let command = Command::new(Verb::ListDirectory, path);
        protocol::write_command(&mut upstream, &command).await?;
        upstream.shutdown().await?;

        let reply = self.read_reply(node, &mut upstream).await?;
        Ok(String::from_utf8_lossy(&reply)
            .lines()
            .map(str::trim)
            .filter(|line| line.ends_with(&node.extension))
            .map(str::to_string)
            .collect())
    }

    /// Local names first, then each node in routing order. A node that
    /// cannot be reached contributes nothing.
    pub async fn collect_listing(&self, path: &str) -> Vec<String> {
        let mut merged = self
            .local
            .store()
            .list_basenames(path)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "local listing failed");
                Vec::new()
            });

        let queries = self
            .routing
            .nodes()
            .iter()
            .map(|node| self.query_listing(node, path));
        let results = join_all(queries).await;

        for (node, result) in self.routing.nodes().iter().zip(results) {
            match result {
                Ok(names) => merged.extend(names),
                Err(e) => {
                    tracing::warn!(node = %node.name, error = %e, "listing contribution dropped")
                }
            }
        }
        merged
    }

    async fn list_all<S>(&self, stream: &mut S, path: &str) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let merged = self.collect_listing(path).await;
        let reply = if merged.is_empty() {
            messages::NO_FILES.to_string()
        } else {
            merged.join("\n")
        };
        protocol::write_status(stream, &reply).await?;
        Ok(())
    }

    /// Reachability of every node, in routing order, for the status API.
    pub async fn node_status(&self) -> Vec<String> {
        let probes = self.routing.nodes().iter().map(|node| async move {
            let state = match self.dial(node).await {
                Ok(_) => "reachable",
                Err(_) => "unreachable",
            };
            format!(
                "{} ({}) at {}: {}",
                node.name, node.extension, node.address, state
            )
        });
        join_all(probes).await
    }
}
