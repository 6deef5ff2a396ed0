//! Extension-sharded file store.
//!
//! Three server roles cooperate: a dispatcher that every client talks to, and
//! storage nodes that each own one file extension. The dispatcher keeps one
//! extension on its own disk and proxies the others.
//!
//! ## Modules
//! - **`protocol`**: command frames, verbs and status replies.
//! - **`relay`**: chunked payload transfer with the short-chunk end marker.
//! - **`routing`**: extension to owner lookup.
//! - **`store`**: filesystem and archiver capabilities of one root.
//! - **`node`**: per-connection command loop of a storage node.
//! - **`dispatcher`**: routing, proxying and listing fan-out.
//! - **`server`**: accept loops, one task per connection.
//! - **`status`**: HTTP status API of the dispatcher.
//! - **`client`**: programmatic client used by the CLI and the tests.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod node;
pub mod protocol;
pub mod relay;
pub mod routing;
pub mod server;
pub mod status;
pub mod store;

pub use error::{Result, StoreError};
