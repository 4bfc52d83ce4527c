//! # Cluster Router
//!
//! Purpose: Route each command to the node that owns its key's hash slot and
//! follow at most one server redirection per invocation.
//!
//! ## Design Principles
//! 1. **Copy-on-Write Topology**: The slot table is an immutable snapshot
//!    swapped behind a read-write lock; lookups clone an `Arc` and release.
//! 2. **Lazy Connections**: A node's connection is started on first use.
//! 3. **Fail Before I/O**: Cross-slot commands are rejected during routing.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use pkv_common::{hash_slot, Command, Frame, SlotId, SLOT_COUNT};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::ConnectionState;
use crate::dispatch::Client;
use crate::error::{ClientError, ClientResult};

/// Address of one cluster node, e.g. "10.0.0.5:6379".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Wraps a `host:port` address.
    pub fn new(addr: impl AsRef<str>) -> Self {
        NodeId(Arc::from(addr.as_ref()))
    }

    /// The node address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(addr: &str) -> Self {
        NodeId::new(addr)
    }
}

/// Slot to node mapping. Unassigned slots belong to the default node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    default: NodeId,
    owners: Vec<Option<NodeId>>,
}

impl SlotTable {
    /// Table that sends every slot to `default`.
    pub fn new(default: NodeId) -> Self {
        SlotTable {
            default,
            owners: vec![None; SLOT_COUNT as usize],
        }
    }

    /// Assigns a range of slots; out-of-range slots are ignored.
    pub fn with_range(mut self, slots: RangeInclusive<SlotId>, node: NodeId) -> Self {
        let end = (*slots.end()).min(SLOT_COUNT - 1);
        for slot in *slots.start()..=end {
            self.owners[slot as usize] = Some(node.clone());
        }
        self
    }

    /// Copy of this table with one slot reassigned.
    pub fn with_slot(&self, slot: SlotId, node: NodeId) -> Self {
        let mut next = self.clone();
        if let Some(owner) = next.owners.get_mut(slot as usize) {
            *owner = Some(node);
        }
        next
    }

    /// Owner of `slot`.
    pub fn node_for(&self, slot: SlotId) -> &NodeId {
        self.owners
            .get(slot as usize)
            .and_then(Option::as_ref)
            .unwrap_or(&self.default)
    }

    /// Node used for unassigned slots and keyless commands.
    pub fn default_node(&self) -> &NodeId {
        &self.default
    }

    /// Every node named by the table, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: BTreeSet<NodeId> = self.owners.iter().flatten().cloned().collect();
        nodes.insert(self.default.clone());
        nodes.into_iter().collect()
    }
}

/// Kind of server redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// The slot moved permanently.
    Moved,
    /// The slot is migrating; ask the target once.
    Ask,
}

/// Parsed `MOVED`/`ASK` error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Moved or Ask.
    pub kind: RedirectKind,
    /// Slot named by the server.
    pub slot: SlotId,
    /// Node to retry on.
    pub node: NodeId,
}

impl Redirect {
    /// Parses `MOVED <slot> <host:port>` or `ASK <slot> <host:port>`.
    pub fn parse(message: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(message).ok()?;
        let mut parts = text.split_ascii_whitespace();
        let kind = match parts.next()? {
            "MOVED" => RedirectKind::Moved,
            "ASK" => RedirectKind::Ask,
            _ => return None,
        };
        let slot: SlotId = parts.next()?.parse().ok()?;
        if slot >= SLOT_COUNT {
            return None;
        }
        let node = NodeId::new(parts.next()?);
        Some(Redirect { kind, slot, node })
    }

    /// Redirection carried by a failed invocation, if any.
    pub fn from_error(err: &ClientError) -> Option<Self> {
        err.server_message().and_then(|message| Redirect::parse(message))
    }
}

/// Client over a set of nodes addressed by hash slot.
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<ClusterInner>,
}

struct ClusterInner {
    template: ClientConfig,
    slots: RwLock<Arc<SlotTable>>,
    nodes: Mutex<HashMap<NodeId, Client>>,
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("nodes", &self.inner.nodes.lock().len())
            .finish()
    }
}

impl ClusterClient {
    /// Router with an initial table. `template` configures every node
    /// connection; its `addr` is replaced per node.
    pub fn new(template: ClientConfig, slots: SlotTable) -> ClientResult<Self> {
        template.validate()?;
        Ok(ClusterClient {
            inner: Arc::new(ClusterInner {
                template,
                slots: RwLock::new(Arc::new(slots)),
                nodes: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Installs a new topology snapshot.
    pub fn update_slots(&self, slots: SlotTable) {
        *self.inner.slots.write() = Arc::new(slots);
        info!("installed new slot table");
    }

    /// Current topology snapshot.
    pub fn slot_table(&self) -> Arc<SlotTable> {
        self.inner.slots.read().clone()
    }

    /// Owner of the slot `key` hashes to.
    pub fn node_for(&self, key: &[u8]) -> NodeId {
        self.slot_table().node_for(hash_slot(key)).clone()
    }

    /// Picks the node for a command.
    ///
    /// Keyless commands go to the default node; keys in different slots fail
    /// with `CrossSlot`.
    pub fn route(&self, command: &Command) -> ClientResult<NodeId> {
        let table = self.slot_table();
        match command_slot(command)? {
            Some(slot) => Ok(table.node_for(slot).clone()),
            None => Ok(table.default_node().clone()),
        }
    }

    /// Connection to `node`, started on first use.
    pub fn connection(&self, node: &NodeId) -> ClientResult<Client> {
        let mut nodes = self.inner.nodes.lock();
        if let Some(client) = nodes.get(node) {
            if client.state() != ConnectionState::Closed {
                return Ok(client.clone());
            }
        }
        debug!(node = %node, "starting node connection");
        let config = ClientConfig {
            addr: node.to_string(),
            ..self.inner.template.clone()
        };
        let client = Client::new(config)?;
        nodes.insert(node.clone(), client.clone());
        Ok(client)
    }

    /// Nodes with a started connection, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.inner.nodes.lock().keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Routes, executes and follows at most one redirection.
    pub async fn execute(&self, command: Command) -> ClientResult<Frame> {
        let node = self.route(&command)?;
        let first = self.connection(&node)?.execute(command.clone()).await;
        let redirect = match first.as_ref().err().and_then(Redirect::from_error) {
            Some(redirect) => redirect,
            None => return first,
        };

        let name = command.display_name();
        let retried = self.follow(&redirect, command).await;
        match retried.as_ref().err().and_then(Redirect::from_error) {
            Some(again) => Err(ClientError::RedirectLoop {
                command: name,
                node: again.node.to_string(),
            }),
            None => retried,
        }
    }

    /// Closes every node connection gracefully.
    pub async fn close(&self) {
        let clients: Vec<Client> = self.inner.nodes.lock().drain().map(|(_, client)| client).collect();
        for client in clients {
            client.close().await;
        }
    }

    async fn follow(&self, redirect: &Redirect, command: Command) -> ClientResult<Frame> {
        let target = self.connection(&redirect.node)?;
        match redirect.kind {
            RedirectKind::Moved => {
                info!(slot = redirect.slot, node = %redirect.node, "slot moved");
                {
                    let mut slots = self.inner.slots.write();
                    let next = slots.with_slot(redirect.slot, redirect.node.clone());
                    *slots = Arc::new(next);
                }
                target.execute(command).await
            }
            RedirectKind::Ask => {
                debug!(slot = redirect.slot, node = %redirect.node, "following ASK redirection");
                let mut handles = target.pipeline(vec![Command::new("ASKING"), command])?.into_iter();
                let (Some(asking), Some(reply)) = (handles.next(), handles.next()) else {
                    return Err(ClientError::InvalidCommand("empty pipeline"));
                };
                asking.await?;
                reply.await
            }
        }
    }
}

/// Slot shared by every key of `command`, or `None` for keyless commands.
pub fn command_slot(command: &Command) -> ClientResult<Option<SlotId>> {
    let mut slots = command.keys().map(|key: &Bytes| hash_slot(key));
    let Some(first) = slots.next() else {
        return Ok(None);
    };
    if slots.any(|slot| slot != first) {
        return Err(ClientError::CrossSlot {
            command: command.display_name(),
        });
    }
    Ok(Some(first))
}
