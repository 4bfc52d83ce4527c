//! # Async Client
//!
//! Purpose: Caller-facing handle over one pipelined connection. Validates
//! commands, applies admission control and returns completion handles.
//!
//! ## Design Principles
//! 1. **Non-blocking Admission**: `invoke` never awaits; it either hands the
//!    command to the driver or fails immediately.
//! 2. **Bounded In-flight Work**: One semaphore permit per accepted command,
//!    released when its pending entry is dropped.
//! 3. **Caller-side Deadlines**: Timeouts live in the handle, so a slow reply
//!    never disturbs queue order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use pkv_common::{Command, Frame, ProtocolVersion, MAX_ARGUMENTS};
use tokio::sync::{broadcast, mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, Sleep};
use tracing::debug;

use crate::config::{ClientConfig, DisconnectedBehavior};
use crate::connection::{ConnectionState, Connector, Driver, Lifecycle, Shared, Submission, TcpConnector};
use crate::error::{ClientError, ClientResult, ConnectionError};
use crate::push::PushMessage;
use crate::queue::{CompletionReceiver, PendingEntry};
use crate::reply::FromFrame;
use crate::stats::StatsSnapshot;

/// Cloneable handle to one logical connection.
///
/// Every clone feeds the same driver task. The connection drains once the
/// last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Arc<ClientConfig>,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<Submission>,
    control: watch::Sender<Lifecycle>,
    state: watch::Receiver<ConnectionState>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.inner.config.addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Starts a TCP connection to `config.addr` in the background.
    ///
    /// Must be called inside a tokio runtime. Commands issued before the
    /// connection is ready are buffered unless `disconnected_behavior` is
    /// `FailFast`.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let connector = TcpConnector::new(config.addr.clone());
        Client::with_connector(config, connector)
    }

    /// Starts a connection and waits until it is ready.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let limit = config.connect_timeout;
        let client = Client::new(config)?;
        match tokio::time::timeout(limit, client.wait_ready()).await {
            Ok(Ok(())) => Ok(client),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                client.shutdown().await;
                Err(ConnectionError::ConnectTimeout(limit).into())
            }
        }
    }

    /// Starts a connection over a custom transport.
    pub fn with_connector<C: Connector>(config: ClientConfig, connector: C) -> ClientResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let (shared, state) = Shared::new();
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (control, control_rx) = watch::channel(Lifecycle::Open);
        let permits = Arc::new(Semaphore::new(config.max_in_flight));

        let driver = Driver::new(connector, Arc::clone(&config), Arc::clone(&shared), requests_rx, control_rx);
        tokio::spawn(driver.run());

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                shared,
                requests,
                control,
                state,
                permits,
            }),
        })
    }

    /// Configuration this client runs with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Waits until the connection is ready.
    ///
    /// Fails once the connection starts draining or is closed.
    pub async fn wait_ready(&self) -> ClientResult<()> {
        let mut state = self.inner.state.clone();
        loop {
            match *state.borrow_and_update() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Draining => return Err(ConnectionError::Closing.into()),
                ConnectionState::Closed => return Err(ConnectionError::Closed.into()),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }
            if state.changed().await.is_err() {
                return Err(ConnectionError::Closed.into());
            }
        }
    }

    /// Protocol negotiated by the most recent handshake.
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.inner.shared.protocol()
    }

    /// Counter snapshot for this connection.
    pub fn stats(&self) -> StatsSnapshot {
        let available = self.inner.permits.available_permits();
        let in_flight = self.inner.config.max_in_flight.saturating_sub(available);
        self.inner.shared.stats.snapshot(in_flight as u64)
    }

    /// Receives pushes for one channel or pattern.
    pub fn listen(&self, channel: impl Into<Bytes>) -> mpsc::UnboundedReceiver<PushMessage> {
        self.inner.shared.pushes.listen(channel.into())
    }

    /// Receives every push frame.
    pub fn pushes(&self) -> broadcast::Receiver<PushMessage> {
        self.inner.shared.pushes.subscribe_all()
    }

    /// Submits a command with the configured default timeout.
    pub fn invoke(&self, command: Command) -> ClientResult<ReplyHandle> {
        self.invoke_with_timeout(command, self.inner.config.command_timeout)
    }

    /// Submits a command with an explicit timeout; `None` waits forever.
    pub fn invoke_with_timeout(&self, command: Command, timeout: Option<Duration>) -> ClientResult<ReplyHandle> {
        self.admit(&command)?;
        let permit = self.acquire()?;
        let (entry, receiver) = PendingEntry::new(Arc::new(command), Some(permit));
        self.submit(Submission::One(entry))?;
        Ok(ReplyHandle::new(receiver, timeout))
    }

    /// Submits several commands that reach the socket back to back.
    ///
    /// Either every command is accepted or none is.
    pub fn pipeline(&self, commands: Vec<Command>) -> ClientResult<Vec<ReplyHandle>> {
        for command in &commands {
            self.admit(command)?;
        }
        let mut permits = Vec::with_capacity(commands.len());
        for _ in &commands {
            permits.push(self.acquire()?);
        }

        let timeout = self.inner.config.command_timeout;
        let mut entries = Vec::with_capacity(commands.len());
        let mut handles = Vec::with_capacity(commands.len());
        for (command, permit) in commands.into_iter().zip(permits) {
            let (entry, receiver) = PendingEntry::new(Arc::new(command), Some(permit));
            entries.push(entry);
            handles.push(ReplyHandle::new(receiver, timeout));
        }
        self.submit(Submission::Pipeline(entries))?;
        Ok(handles)
    }

    /// Submits a command and waits for its reply.
    pub async fn execute(&self, command: Command) -> ClientResult<Frame> {
        self.invoke(command)?.await
    }

    /// Submits a command and converts its reply.
    pub async fn query<T: FromFrame>(&self, command: Command) -> ClientResult<T> {
        T::from_frame(self.execute(command).await?)
    }

    /// Pings the server. Returns the raw response payload.
    pub async fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Bytes> {
        let mut command = Command::new("PING");
        if let Some(payload) = payload {
            command = command.arg(Bytes::copy_from_slice(payload));
        }
        self.query(command).await
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub async fn get(&self, key: &[u8]) -> ClientResult<Option<Bytes>> {
        self.query(Command::new("GET").key(Bytes::copy_from_slice(key))).await
    }

    /// Sets a value for a key without expiration.
    pub async fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        let command = Command::new("SET")
            .key(Bytes::copy_from_slice(key))
            .arg(Bytes::copy_from_slice(value));
        self.query(command).await
    }

    /// Deletes a key. Returns true when a key was removed.
    pub async fn del(&self, key: &[u8]) -> ClientResult<bool> {
        let removed: i64 = self.query(Command::new("DEL").key(Bytes::copy_from_slice(key))).await?;
        Ok(removed > 0)
    }

    /// Stops accepting commands, lets accepted ones finish, then closes.
    pub async fn close(&self) {
        self.inner.control.send_if_modified(|lifecycle| {
            if *lifecycle == Lifecycle::Open {
                *lifecycle = Lifecycle::Draining;
                true
            } else {
                false
            }
        });
        self.wait_closed().await;
    }

    /// Closes immediately; every pending command fails with `Closed`.
    pub async fn shutdown(&self) {
        self.inner.control.send_replace(Lifecycle::Shutdown);
        self.wait_closed().await;
    }

    async fn wait_closed(&self) {
        let mut state = self.inner.state.clone();
        while *state.borrow_and_update() != ConnectionState::Closed {
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    fn admit(&self, command: &Command) -> ClientResult<()> {
        if command.name().is_empty() {
            return Err(ClientError::InvalidCommand("empty command name"));
        }
        if command.wire_len() > MAX_ARGUMENTS {
            return Err(ClientError::InvalidCommand("too many arguments"));
        }
        if command.is_subscription() && self.protocol() == Some(ProtocolVersion::Resp2) {
            return Err(ClientError::InvalidCommand("subscriptions need a RESP3 connection"));
        }
        if *self.inner.control.borrow() != Lifecycle::Open {
            return Err(ConnectionError::Closing.into());
        }
        match self.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(ConnectionError::Closed.into()),
            ConnectionState::Draining => Err(ConnectionError::Closing.into()),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                match self.inner.config.disconnected_behavior {
                    DisconnectedBehavior::Queue => Ok(()),
                    DisconnectedBehavior::FailFast => Err(ConnectionError::NotReady.into()),
                }
            }
        }
    }

    fn acquire(&self) -> ClientResult<OwnedSemaphorePermit> {
        Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|_| ClientError::Capacity {
                limit: self.inner.config.max_in_flight,
            })
    }

    fn submit(&self, submission: Submission) -> ClientResult<()> {
        self.inner.requests.send(submission).map_err(|rejected| {
            debug!("driver stopped accepting commands");
            // The rejected entries drop here, releasing their permits.
            drop(rejected);
            ClientError::from(ConnectionError::Closing)
        })
    }
}

/// Pending reply to one submitted command.
///
/// Resolves to the reply, a `Timeout` once the deadline passes, or the
/// failure assigned by the connection. Dropping the handle abandons the
/// command without removing it from the queue.
#[must_use = "the reply is lost unless the handle is awaited"]
pub struct ReplyHandle {
    receiver: CompletionReceiver,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandle").field("timeout", &self.timeout).finish()
    }
}

impl ReplyHandle {
    fn new(receiver: CompletionReceiver, timeout: Option<Duration>) -> Self {
        ReplyHandle {
            receiver,
            timeout,
            deadline: timeout.map(|limit| Instant::now() + limit),
            sleep: None,
        }
    }

    /// Gives up on the reply. The command stays queued and its reply is discarded.
    pub fn cancel(mut self) {
        self.receiver.close();
    }
}

impl Future for ReplyHandle {
    type Output = ClientResult<Frame>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Poll::Ready(result) = Pin::new(&mut this.receiver).poll(cx) {
            return Poll::Ready(result.unwrap_or_else(|_| Err(ConnectionError::Closed.into())));
        }

        let (Some(limit), Some(deadline)) = (this.timeout, this.deadline) else {
            return Poll::Pending;
        };
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
        if sleep.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        this.receiver.close();
        // A reply that raced the deadline still wins.
        match this.receiver.try_recv() {
            Ok(result) => Poll::Ready(result),
            Err(_) => Poll::Ready(Err(ClientError::Timeout(limit))),
        }
    }
}
