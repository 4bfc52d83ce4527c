//! # PipeKV Async Client
//!
//! Purpose: Multiplex many concurrently issued commands over one pipelined
//! RESP2/RESP3 connection, match replies in issue order, and keep the
//! connection alive across network failures and cluster topology changes.
//!
//! ## Design Principles
//! 1. **One Driver per Socket**: A single task owns each socket, so enqueue
//!    order, wire order and reply order agree.
//! 2. **Explicit Failure Semantics**: Every accepted command ends in exactly
//!    one outcome: a reply, a server error, a timeout or a connection error.
//! 3. **Protocol Clarity**: Framing lives in `pkv-common`; this crate only
//!    moves frames.
//!
//! ```no_run
//! use pkv_client::{Client, ClientConfig};
//!
//! # async fn demo() -> pkv_client::ClientResult<()> {
//! let client = Client::connect(ClientConfig::new("127.0.0.1:6379")).await?;
//! client.set(b"greeting", b"hello").await?;
//! assert_eq!(client.get(b"greeting").await?.as_deref(), Some(&b"hello"[..]));
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod cluster;
mod config;
mod connection;
mod dispatch;
mod error;
mod push;
mod queue;
mod reply;
mod stats;

pub use backoff::Backoff;
pub use cluster::{command_slot, ClusterClient, NodeId, Redirect, RedirectKind, SlotTable};
pub use config::{BackoffConfig, ClientConfig, DisconnectedBehavior, ReplayPolicy};
pub use connection::{ConnectionState, Connector, TcpConnector};
pub use dispatch::{Client, ReplyHandle};
pub use error::{ClientError, ClientResult, ConnectionError};
pub use push::PushMessage;
pub use queue::{PendingEntry, PendingQueue};
pub use reply::FromFrame;
pub use stats::StatsSnapshot;

pub use pkv_common::{Command, Frame, ProtocolVersion};
