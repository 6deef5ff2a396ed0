//! Accept loops: one tokio task per connection, nothing shared between them
//! except the read-only handler state behind an `Arc`.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::node::StorageNode;

/// Pause after a failed accept, so a persistent failure (out of file
/// descriptors) does not spin the loop.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of incoming connections.
pub trait Incoming: Send {
    type Stream: Send + 'static;

    fn next_connection(
        &mut self,
    ) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Incoming for TcpListener {
    type Stream = TcpStream;

    async fn next_connection(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.accept().await?;
        // Small status frames must not wait behind the last payload chunk.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "cannot disable Nagle");
        }
        Ok((stream, peer))
    }
}

/// Accepts connections forever, running `handler` for each one in its own
/// task. A failing session never affects its siblings or the loop.
pub async fn accept_loop<L, F, Fut>(mut listener: L, handler: F)
where
    L: Incoming,
    F: Fn(L::Stream) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        match listener.next_connection().await {
            Ok((stream, peer)) => {
                let session = handler(stream);
                let span = tracing::info_span!("session", %peer);
                tokio::spawn(
                    async move {
                        tracing::info!("client connected");
                        match session.await {
                            Ok(()) => tracing::info!("client disconnected"),
                            Err(e) => tracing::warn!(error = %e, "session terminated"),
                        }
                    }
                    .instrument(span),
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

pub async fn run_dispatcher(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    accept_loop(listener, move |stream| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.serve_connection(stream).await }
    })
    .await
}

pub async fn run_node(listener: TcpListener, node: Arc<StorageNode>) {
    accept_loop(listener, move |stream| {
        let node = Arc::clone(&node);
        async move { node.serve_connection(stream).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Exhausted {
        attempts: Arc<AtomicUsize>,
    }

    impl Incoming for Exhausted {
        type Stream = tokio::io::DuplexStream;

        async fn next_connection(&mut self) -> io::Result<(Self::Stream, SocketAddr)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
        }
    }

    #[tokio::test]
    async fn failing_accept_backs_off() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let incoming = Exhausted {
            attempts: Arc::clone(&attempts),
        };

        let run = accept_loop(incoming, |_stream| async { Ok::<(), StoreError>(()) });
        let window = ACCEPT_BACKOFF * 5 / 2;
        assert!(tokio::time::timeout(window, run).await.is_err());

        let attempts = attempts.load(Ordering::SeqCst);
        assert!((2..=4).contains(&attempts), "{} accept attempts", attempts);
    }
}
