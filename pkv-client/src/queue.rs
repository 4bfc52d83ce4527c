//! # Pending Queue
//!
//! Purpose: Keep commands that were accepted by a connection, in issue
//! order, until their reply is decoded or the connection is torn down.
//!
//! ## Design Principles
//! 1. **FIFO Matching**: The writer pushes at the back when it encodes a
//!    command; the reader pops the front for every non-push reply.
//! 2. **Exactly Once**: An entry leaves the queue once, by `pop_front`,
//!    `drain` or a completed subscription confirmation.
//! 3. **Abandonment Is Not Removal**: A caller that times out or cancels
//!    only closes its receiver; the entry keeps its slot so later replies
//!    still line up.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pkv_common::{Command, Frame};
use tokio::sync::{oneshot, OwnedSemaphorePermit};

use crate::error::{ClientError, ClientResult};

pub(crate) type Completion = oneshot::Sender<ClientResult<Frame>>;
pub(crate) type CompletionReceiver = oneshot::Receiver<ClientResult<Frame>>;

/// Bookkeeping for one command awaiting its reply.
#[derive(Debug)]
pub struct PendingEntry {
    command: Arc<Command>,
    completion: Completion,
    enqueued_at: Instant,
    wire_end: u64,
    // Zero until the first confirmation of an argument-less unsubscribe.
    confirmations: usize,
    // Released when the entry is dropped, freeing in-flight capacity.
    _permit: Option<OwnedSemaphorePermit>,
}

impl PendingEntry {
    pub(crate) fn new(command: Arc<Command>, permit: Option<OwnedSemaphorePermit>) -> (Self, CompletionReceiver) {
        let (completion, receiver) = oneshot::channel();
        let entry = PendingEntry {
            confirmations: initial_confirmations(&command),
            command,
            completion,
            enqueued_at: Instant::now(),
            wire_end: 0,
            _permit: permit,
        };
        (entry, receiver)
    }

    /// The command this entry waits on.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Time since the entry was created.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// True when the caller timed out, cancelled or dropped its handle.
    pub fn is_abandoned(&self) -> bool {
        self.completion.is_closed()
    }

    /// Byte offset on the current socket where this command's encoding ends.
    pub fn wire_end(&self) -> u64 {
        self.wire_end
    }

    pub(crate) fn set_wire_end(&mut self, offset: u64) {
        self.wire_end = offset;
    }

    /// Forgets confirmations counted on a previous socket.
    pub(crate) fn rearm(&mut self) {
        self.confirmations = initial_confirmations(&self.command);
    }

    /// Delivers the outcome; false when nobody is listening any more.
    pub(crate) fn complete(self, result: ClientResult<Frame>) -> bool {
        self.completion.send(result).is_ok()
    }

    pub(crate) fn fail(self, err: impl Into<ClientError>) -> bool {
        self.complete(Err(err.into()))
    }
}

fn initial_confirmations(command: &Command) -> usize {
    if command.is_subscription() {
        command.args().len()
    } else {
        1
    }
}

/// Ordered queue of entries for one connection.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Mutex<VecDeque<PendingEntry>>,
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        PendingQueue::default()
    }

    /// Appends at the back.
    pub fn push(&self, entry: PendingEntry) {
        self.entries.lock().push_back(entry);
    }

    /// Removes the oldest entry.
    pub fn pop_front(&self) -> Option<PendingEntry> {
        self.entries.lock().pop_front()
    }

    /// Empties the queue, oldest first.
    pub fn drain(&self) -> Vec<PendingEntry> {
        self.entries.lock().drain(..).collect()
    }

    /// Entries currently waiting.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Runs `f` against the oldest entry while holding the lock.
    pub fn with_front<R>(&self, f: impl FnOnce(Option<&mut PendingEntry>) -> R) -> R {
        f(self.entries.lock().front_mut())
    }

    /// Counts a RESP3 subscription confirmation against the oldest entry.
    ///
    /// Returns the entry once it has seen one confirmation per channel. An
    /// argument-less unsubscribe expects one per entry in `active`, the
    /// confirmed subscriptions of its family, or one when there are none.
    pub(crate) fn confirm_subscription(&self, kind: &[u8], active: usize) -> Option<PendingEntry> {
        let confirmed = self.with_front(|front| match front {
            Some(entry) if entry.command.is_subscription() && entry.command.is(kind) => {
                if entry.confirmations == 0 {
                    entry.confirmations = active.max(1);
                }
                entry.confirmations -= 1;
                entry.confirmations == 0
            }
            _ => false,
        });
        // Only the read loop removes entries, so the front cannot change here.
        if confirmed {
            self.pop_front()
        } else {
            None
        }
    }
}
