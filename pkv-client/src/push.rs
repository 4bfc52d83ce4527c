//! Out-of-band push delivery.
//!
//! Push frames never touch the pending queue. Each one is broadcast to
//! catch-all receivers and sent to listeners registered for its channel or
//! pattern. Subscription confirmations also update the set of channels the
//! server has accepted, so a new socket can subscribe to them again.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use parking_lot::Mutex;
use pkv_common::{Command, Frame};
use tokio::sync::{broadcast, mpsc};

const BROADCAST_CAPACITY: usize = 1024;

/// Push kinds whose second element names a channel or pattern.
const KEYED_KINDS: &[&[u8]] = &[
    b"message",
    b"pmessage",
    b"smessage",
    b"subscribe",
    b"psubscribe",
    b"ssubscribe",
    b"unsubscribe",
    b"punsubscribe",
    b"sunsubscribe",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Channel,
    Pattern,
    Shard,
}

/// Confirmation kinds: which family they touch and whether they add to it.
const CONFIRMATIONS: &[(&[u8], Family, bool)] = &[
    (b"subscribe", Family::Channel, true),
    (b"unsubscribe", Family::Channel, false),
    (b"psubscribe", Family::Pattern, true),
    (b"punsubscribe", Family::Pattern, false),
    (b"ssubscribe", Family::Shard, true),
    (b"sunsubscribe", Family::Shard, false),
];

fn confirmation(kind: &[u8]) -> Option<(Family, bool)> {
    CONFIRMATIONS
        .iter()
        .find(|(known, _, _)| kind.eq_ignore_ascii_case(known))
        .map(|&(_, family, adds)| (family, adds))
}

/// True for `subscribe`, `psubscribe` and `ssubscribe` pushes.
pub(crate) fn is_subscribe_confirmation(kind: &[u8]) -> bool {
    matches!(confirmation(kind), Some((_, true)))
}

/// Channels, patterns and shard channels the server has confirmed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ActiveSubscriptions {
    channels: BTreeSet<Bytes>,
    patterns: BTreeSet<Bytes>,
    shard_channels: BTreeSet<Bytes>,
}

impl ActiveSubscriptions {
    fn family(&self, family: Family) -> &BTreeSet<Bytes> {
        match family {
            Family::Channel => &self.channels,
            Family::Pattern => &self.patterns,
            Family::Shard => &self.shard_channels,
        }
    }

    fn family_mut(&mut self, family: Family) -> &mut BTreeSet<Bytes> {
        match family {
            Family::Channel => &mut self.channels,
            Family::Pattern => &mut self.patterns,
            Family::Shard => &mut self.shard_channels,
        }
    }

    /// Applies one confirmation push; other pushes are ignored.
    pub(crate) fn apply(&mut self, message: &PushMessage) {
        let (Some((family, adds)), Some(channel)) = (confirmation(&message.kind), &message.channel) else {
            return;
        };
        let set = self.family_mut(family);
        if adds {
            set.insert(channel.clone());
        } else {
            set.remove(channel);
        }
    }

    /// Confirmed entries of the family a confirmation kind belongs to.
    pub(crate) fn count_for(&self, kind: &[u8]) -> usize {
        confirmation(kind).map_or(0, |(family, _)| self.family(family).len())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty() && self.shard_channels.is_empty()
    }

    /// Commands that subscribe a fresh socket to everything confirmed so far.
    ///
    /// Shard channels go one per command since they may live in different slots.
    pub(crate) fn restore_commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if !self.channels.is_empty() {
            let subscribe = self.channels.iter().cloned();
            commands.push(subscribe.fold(Command::new("SUBSCRIBE"), |command, channel| command.arg(channel)));
        }
        if !self.patterns.is_empty() {
            let psubscribe = self.patterns.iter().cloned();
            commands.push(psubscribe.fold(Command::new("PSUBSCRIBE"), |command, pattern| command.arg(pattern)));
        }
        for channel in &self.shard_channels {
            commands.push(Command::new("SSUBSCRIBE").arg(channel.clone()));
        }
        commands
    }
}

/// A decoded push frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    /// First element, e.g. `message` or `invalidate`.
    pub kind: Bytes,
    /// Channel (or pattern for `pmessage`) for pub/sub kinds.
    pub channel: Option<Bytes>,
    /// All elements of the push frame.
    pub frames: Vec<Frame>,
}

impl PushMessage {
    /// Classifies the elements of a push frame.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        let kind = frames
            .first()
            .and_then(Frame::as_bytes)
            .cloned()
            .unwrap_or_default();
        let keyed = KEYED_KINDS.iter().any(|known| kind.eq_ignore_ascii_case(known));
        let channel = if keyed {
            frames.get(1).and_then(Frame::as_bytes).cloned()
        } else {
            None
        };
        PushMessage { kind, channel, frames }
    }

    /// Last element; the payload for `message`/`pmessage`.
    pub fn payload(&self) -> Option<&Frame> {
        if self.frames.len() > 1 {
            self.frames.last()
        } else {
            None
        }
    }
}

/// Registry of push subscribers for one connection.
#[derive(Debug)]
pub(crate) struct PushListeners {
    keyed: Mutex<HashMap<Bytes, Vec<mpsc::UnboundedSender<PushMessage>>>>,
    all: broadcast::Sender<PushMessage>,
    active: Mutex<ActiveSubscriptions>,
}

impl Default for PushListeners {
    fn default() -> Self {
        let (all, _) = broadcast::channel(BROADCAST_CAPACITY);
        PushListeners {
            keyed: Mutex::new(HashMap::new()),
            all,
            active: Mutex::new(ActiveSubscriptions::default()),
        }
    }
}

impl PushListeners {
    /// Receives pushes for one channel or pattern.
    pub(crate) fn listen(&self, key: Bytes) -> mpsc::UnboundedReceiver<PushMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.keyed.lock().entry(key).or_default().push(tx);
        rx
    }

    /// Receives every push.
    pub(crate) fn subscribe_all(&self) -> broadcast::Receiver<PushMessage> {
        self.all.subscribe()
    }

    /// Records a confirmation in the active subscription set.
    pub(crate) fn track(&self, message: &PushMessage) {
        self.active.lock().apply(message);
    }

    /// Confirmations an argument-less unsubscribe of `kind` produces right now.
    pub(crate) fn active_count(&self, kind: &[u8]) -> usize {
        self.active.lock().count_for(kind)
    }

    pub(crate) fn active(&self) -> ActiveSubscriptions {
        self.active.lock().clone()
    }

    /// Drops the subscription set, e.g. when a new socket cannot carry it.
    pub(crate) fn forget_subscriptions(&self) -> ActiveSubscriptions {
        std::mem::take(&mut *self.active.lock())
    }

    pub(crate) fn deliver(&self, message: PushMessage) {
        if let Some(channel) = &message.channel {
            let mut keyed = self.keyed.lock();
            if let Some(listeners) = keyed.get_mut(channel) {
                listeners.retain(|tx| tx.send(message.clone()).is_ok());
                if listeners.is_empty() {
                    keyed.remove(channel);
                }
            }
        }
        // No catch-all receivers is normal.
        let _ = self.all.send(message);
    }
}
