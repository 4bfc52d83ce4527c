//! # Connection State Machine
//!
//! Purpose: Own one physical socket at a time, pipeline commands onto it,
//! match replies in issue order and keep the connection alive across
//! transient failures.
//!
//! ## Design Principles
//! 1. **Single Writer**: Every submission funnels through one channel into
//!    the driver task, so encode order, queue order and wire order agree.
//! 2. **Independent Reader**: The read loop only decodes and pops the queue
//!    front; it never touches the outbound buffer.
//! 3. **Backpressure, Not Loss**: Bytes the socket cannot take stay in the
//!    outbound buffer and new submissions wait in the channel until the
//!    socket drains.
//! 4. **Explicit Replay**: After a failure every pending entry is either
//!    resent or failed according to `ReplayPolicy`, never silently dropped.
//! 5. **Sticky Subscriptions**: Channels confirmed on one socket are
//!    subscribed again on the next before caller commands flow.
//!
//! ## State Flow
//!
//! ```text
//! Connecting ──ok──> Ready ──close()──> Draining ──queue empty──> Closed
//!     ^               │
//!     │            io/protocol error, EOF
//!     │               v
//!     └──backoff── Reconnecting ──shutdown()──> Closed
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use pkv_common::{encode_command, Command, Frame, FrameDecoder, ProtocolError, ProtocolVersion};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::{ClientConfig, ReplayPolicy};
use crate::error::{ClientError, ClientResult, ConnectionError};
use crate::push::{is_subscribe_confirmation, PushListeners, PushMessage};
use crate::queue::{PendingEntry, PendingQueue};
use crate::stats::Stats;

/// Initial capacity of the receive buffer.
const READ_BUF_SIZE: usize = 16 * 1024;

/// Stop batching submissions into one write once this many bytes are queued.
const MAX_BATCH_BYTES: usize = 64 * 1024;

/// Lifecycle of one logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Establishing the socket and running the handshake.
    Connecting,
    /// Accepting and pipelining commands.
    Ready,
    /// Finishing accepted commands before closing.
    Draining,
    /// Waiting out the backoff delay after a failure.
    Reconnecting,
    /// Permanently shut down.
    Closed,
}

/// Caller intent, published by the client handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Open,
    Draining,
    Shutdown,
}

/// Source of fresh byte streams to the server.
///
/// The driver calls `connect` once per connection attempt.
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by a successful connect.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a new stream.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Connector for `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = self.addr.clone();
        async move {
            let stream = TcpStream::connect(addr.as_str()).await?;
            // Disable Nagle to keep request latency low for small payloads.
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

/// One batch handed from a client handle to the driver.
#[derive(Debug)]
pub(crate) enum Submission {
    One(PendingEntry),
    Pipeline(Vec<PendingEntry>),
}

/// State shared between the driver, its read loop and the client handles.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) queue: PendingQueue,
    pub(crate) pushes: PushListeners,
    pub(crate) stats: Stats,
    state: watch::Sender<ConnectionState>,
    protocol: AtomicU8,
    idle: Notify,
}

impl Shared {
    pub(crate) fn new() -> (Arc<Self>, watch::Receiver<ConnectionState>) {
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);
        let shared = Shared {
            queue: PendingQueue::new(),
            pushes: PushListeners::default(),
            stats: Stats::default(),
            state,
            protocol: AtomicU8::new(0),
            idle: Notify::new(),
        };
        (Arc::new(shared), state_rx)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "connection state changed");
        }
    }

    /// Version negotiated by the last successful handshake.
    pub(crate) fn protocol(&self) -> Option<ProtocolVersion> {
        match self.protocol.load(Ordering::Relaxed) {
            2 => Some(ProtocolVersion::Resp2),
            3 => Some(ProtocolVersion::Resp3),
            _ => None,
        }
    }

    fn set_protocol(&self, version: ProtocolVersion) {
        self.protocol.store(version.as_u8(), Ordering::Relaxed);
    }

    /// Routes one decoded frame: pushes to listeners, replies to the queue front.
    fn on_frame(&self, frame: Frame) -> Result<(), Failure> {
        let frame = match frame {
            Frame::Push(items) => {
                self.on_push(PushMessage::from_frames(items));
                return Ok(());
            }
            other => other,
        };

        let entry = self.queue.pop_front().ok_or(Failure::Unmatched(frame.kind()))?;
        let result = match frame {
            Frame::Error(message) | Frame::BlobError(message) => Err(ClientError::Command(message)),
            other => Ok(other),
        };
        self.settle(entry, result);
        if self.queue.is_empty() {
            self.idle.notify_one();
        }
        Ok(())
    }

    fn on_push(&self, message: PushMessage) {
        self.stats.record_push();
        // Over RESP3 a SUBSCRIBE-family reply is itself a push frame.
        let active = self.pushes.active_count(&message.kind);
        if let Some(entry) = self.queue.confirm_subscription(&message.kind, active) {
            self.settle(entry, Ok(Frame::Push(message.frames.clone())));
            if self.queue.is_empty() {
                self.idle.notify_one();
            }
        }
        self.pushes.track(&message);
        self.pushes.deliver(message);
    }

    fn settle(&self, entry: PendingEntry, result: ClientResult<Frame>) {
        if entry.is_abandoned() {
            self.stats.record_late_reply();
            debug!(
                command = %entry.command().display_name(),
                age = ?entry.age(),
                "discarding reply for abandoned command"
            );
            return;
        }
        self.stats.record_reply();
        entry.complete(result);
    }
}

/// Why a live session ended.
#[derive(Debug)]
enum Failure {
    Io(io::Error),
    Eof,
    Protocol(ProtocolError),
    Unmatched(&'static str),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Io(err) => write!(f, "io error: {}", err),
            Failure::Eof => write!(f, "peer closed the connection"),
            Failure::Protocol(err) => write!(f, "protocol error: {}", err),
            Failure::Unmatched(kind) => write!(f, "{} reply with no pending command", kind),
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Drained,
    Shutdown,
    Failed { failure: Failure, flushed: u64 },
}

/// Socket plus decode state produced by a successful handshake.
struct Session<S> {
    stream: S,
    decoder: FrameDecoder,
    read_buf: BytesMut,
}

/// Byte counters for the current socket.
#[derive(Debug, Default)]
struct Wire {
    flushed: u64,
}

/// Background task that owns the socket and runs the state machine.
pub(crate) struct Driver<C: Connector> {
    connector: C,
    config: Arc<ClientConfig>,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedReceiver<Submission>,
    control: watch::Receiver<Lifecycle>,
    backoff: Backoff,
    replay: VecDeque<PendingEntry>,
    draining: bool,
    requests_exhausted: bool,
}

impl<C: Connector> Driver<C> {
    pub(crate) fn new(
        connector: C,
        config: Arc<ClientConfig>,
        shared: Arc<Shared>,
        requests: mpsc::UnboundedReceiver<Submission>,
        control: watch::Receiver<Lifecycle>,
    ) -> Self {
        Driver {
            connector,
            backoff: Backoff::new(config.backoff.clone()),
            config,
            shared,
            requests,
            control,
            replay: VecDeque::new(),
            draining: false,
            requests_exhausted: false,
        }
    }

    /// Runs until the connection is drained or shut down.
    pub(crate) async fn run(mut self) {
        loop {
            let lifecycle = *self.control.borrow();
            match lifecycle {
                Lifecycle::Shutdown => break,
                Lifecycle::Draining if !self.draining => self.begin_drain(),
                _ => {}
            }
            if !self.draining && self.control.has_changed().is_err() {
                debug!(addr = %self.config.addr, "every client handle dropped");
                self.begin_drain();
            }
            if self.drained() {
                break;
            }

            self.shared.set_state(ConnectionState::Connecting);
            let established = tokio::select! {
                result = establish(&self.connector, &self.config, &self.shared) => result,
                _ = shutdown_requested(&mut self.control) => break,
            };

            match established {
                Ok(session) => {
                    self.backoff.reset();
                    self.shared.stats.record_connect();
                    self.shared.set_state(if self.draining {
                        ConnectionState::Draining
                    } else {
                        ConnectionState::Ready
                    });
                    match self.serve(session).await {
                        Outcome::Drained | Outcome::Shutdown => break,
                        Outcome::Failed { failure, flushed } => {
                            warn!(addr = %self.config.addr, error = %failure, "connection lost");
                            self.shared.set_state(ConnectionState::Reconnecting);
                            self.recover(flushed);
                        }
                    }
                }
                Err(err) => {
                    warn!(addr = %self.config.addr, error = %err, "connect attempt failed");
                    self.shared.set_state(ConnectionState::Reconnecting);
                }
            }

            let delay = self.backoff.next_delay();
            debug!(?delay, attempt = self.backoff.attempts(), "waiting before reconnect");
            if !self.wait_backoff(delay).await {
                break;
            }
        }
        self.finish();
    }

    /// Sleeps out a reconnect delay. Returns false once the driver should stop.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        // A close() seen while connecting is not reported again by `next_lifecycle`.
        let mut lifecycle = *self.control.borrow();
        loop {
            match lifecycle {
                Lifecycle::Shutdown => return false,
                Lifecycle::Draining => {
                    self.begin_drain();
                    if self.drained() {
                        return false;
                    }
                }
                Lifecycle::Open => {}
            }
            tokio::select! {
                _ = &mut sleep => return true,
                next = next_lifecycle(&mut self.control) => lifecycle = next,
            }
        }
    }

    /// True once a draining driver has nothing left to send or await.
    ///
    /// Used between sockets, where no write loop is reading the request
    /// channel: buffered submissions move to the replay queue so they go out
    /// first on the next socket.
    fn drained(&mut self) -> bool {
        if !self.draining {
            return false;
        }
        // `begin_drain` closed the channel, so once empty it stays empty.
        while !self.requests_exhausted {
            match self.requests.try_recv() {
                Ok(Submission::One(entry)) => self.replay.push_back(entry),
                Ok(Submission::Pipeline(entries)) => self.replay.extend(entries),
                Err(_) => self.requests_exhausted = true,
            }
        }
        self.requests_exhausted && self.replay.is_empty() && self.shared.queue.is_empty()
    }

    fn begin_drain(&mut self) {
        if self.draining {
            return;
        }
        info!(addr = %self.config.addr, pending = self.shared.queue.len(), "draining connection");
        self.draining = true;
        // Already-buffered submissions are still delivered by `recv`.
        self.requests.close();
        if self.shared.state() == ConnectionState::Ready {
            self.shared.set_state(ConnectionState::Draining);
        }
    }

    async fn serve(&mut self, session: Session<C::Stream>) -> Outcome {
        let Session {
            stream,
            mut decoder,
            mut read_buf,
        } = session;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let shared = Arc::clone(&self.shared);
        let mut wire = Wire::default();
        let mut outbound = BytesMut::with_capacity(MAX_BATCH_BYTES);

        self.requeue_replay(&mut outbound, &wire);

        let outcome = {
            let read = read_loop(&mut reader, &mut read_buf, &mut decoder, &shared);
            let write = self.write_loop(&mut writer, &mut outbound, &mut wire);
            tokio::select! {
                failure = read => Outcome::Failed { failure, flushed: 0 },
                outcome = write => outcome,
            }
        };

        match outcome {
            Outcome::Failed { failure, .. } => Outcome::Failed {
                failure,
                flushed: wire.flushed,
            },
            other => other,
        }
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        outbound: &mut BytesMut,
        wire: &mut Wire,
    ) -> Outcome {
        loop {
            // Changes observed while connecting are not reported again by `next_lifecycle`.
            let lifecycle = *self.control.borrow();
            if let Some(outcome) = self.on_lifecycle(lifecycle) {
                return outcome;
            }

            if !outbound.is_empty() {
                // New submissions wait in the channel while the socket is full.
                let written = tokio::select! {
                    biased;
                    lifecycle = next_lifecycle(&mut self.control) => {
                        if let Some(outcome) = self.on_lifecycle(lifecycle) {
                            return outcome;
                        }
                        continue;
                    }
                    result = writer.write(&outbound[..]) => result,
                };
                match written {
                    Ok(0) => return failed(io::ErrorKind::WriteZero.into(), wire),
                    Ok(n) => {
                        outbound.advance(n);
                        wire.flushed += n as u64;
                    }
                    Err(err) => return failed(err, wire),
                }
                if outbound.is_empty() {
                    if let Err(err) = writer.flush().await {
                        return failed(err, wire);
                    }
                }
                continue;
            }

            if self.draining && self.requests_exhausted && self.shared.queue.is_empty() {
                let _ = writer.shutdown().await;
                info!(addr = %self.config.addr, "connection drained");
                return Outcome::Drained;
            }

            tokio::select! {
                biased;
                lifecycle = next_lifecycle(&mut self.control) => {
                    if let Some(outcome) = self.on_lifecycle(lifecycle) {
                        return outcome;
                    }
                }
                submission = self.requests.recv(), if !self.requests_exhausted => match submission {
                    Some(submission) => {
                        self.accept(submission, outbound, wire);
                        while outbound.len() < MAX_BATCH_BYTES {
                            match self.requests.try_recv() {
                                Ok(submission) => self.accept(submission, outbound, wire),
                                Err(_) => break,
                            }
                        }
                    }
                    None => {
                        self.requests_exhausted = true;
                        self.begin_drain();
                    }
                },
                _ = self.shared.idle.notified(), if self.draining => {}
            }
        }
    }

    fn on_lifecycle(&mut self, lifecycle: Lifecycle) -> Option<Outcome> {
        match lifecycle {
            Lifecycle::Shutdown => Some(Outcome::Shutdown),
            Lifecycle::Draining => {
                self.begin_drain();
                None
            }
            Lifecycle::Open => None,
        }
    }

    fn accept(&mut self, submission: Submission, outbound: &mut BytesMut, wire: &Wire) {
        match submission {
            Submission::One(entry) => self.enqueue(entry, outbound, wire),
            Submission::Pipeline(entries) => {
                for entry in entries {
                    self.enqueue(entry, outbound, wire);
                }
            }
        }
    }

    /// Encodes an entry and records it as pending, before any of its bytes are written.
    fn enqueue(&self, mut entry: PendingEntry, outbound: &mut BytesMut, wire: &Wire) {
        encode_command(entry.command(), outbound);
        entry.set_wire_end(wire.flushed + outbound.len() as u64);
        self.shared.stats.record_sent();
        self.shared.queue.push(entry);
    }

    fn requeue_replay(&mut self, outbound: &mut BytesMut, wire: &Wire) {
        if self.replay.is_empty() {
            return;
        }
        let entries: Vec<PendingEntry> = self.replay.drain(..).collect();
        info!(count = entries.len(), "replaying commands on new connection");
        for mut entry in entries {
            entry.rearm();
            self.enqueue(entry, outbound, wire);
        }
    }

    /// Applies the replay policy to everything left in the queue.
    fn recover(&mut self, flushed: u64) {
        let policy = self.config.replay;
        let (mut replayed, mut failed, mut abandoned) = (0u64, 0u64, 0u64);

        for entry in self.shared.queue.drain() {
            if entry.is_abandoned() {
                abandoned += 1;
                continue;
            }
            let resend = match policy {
                ReplayPolicy::ReplayAll => true,
                ReplayPolicy::ReplayIdempotentOnly => entry.command().is_idempotent(),
                ReplayPolicy::FailAll => false,
            };
            if resend {
                replayed += 1;
                self.replay.push_back(entry);
                continue;
            }
            // A partially written command is never executed by the server.
            let reason = if entry.wire_end() <= flushed {
                ConnectionError::ReplyUnknown
            } else {
                ConnectionError::NotReplayed
            };
            failed += 1;
            entry.fail(reason);
        }

        self.shared.stats.record_replay(replayed, failed);
        self.shared.idle.notify_one();
        info!(?policy, replayed, failed, abandoned, "applied replay policy");
    }

    fn finish(&mut self) {
        self.shared.set_state(ConnectionState::Closed);
        self.requests.close();

        let mut failed = 0usize;
        let leftovers = self.shared.queue.drain().into_iter().chain(self.replay.drain(..));
        for entry in leftovers {
            entry.fail(ConnectionError::Closed);
            failed += 1;
        }
        while let Ok(submission) = self.requests.try_recv() {
            let entries = match submission {
                Submission::One(entry) => vec![entry],
                Submission::Pipeline(entries) => entries,
            };
            for entry in entries {
                entry.fail(ConnectionError::Closed);
                failed += 1;
            }
        }
        info!(addr = %self.config.addr, failed, "connection closed");
    }
}

fn failed(err: io::Error, wire: &Wire) -> Outcome {
    Outcome::Failed {
        failure: Failure::Io(err),
        flushed: wire.flushed,
    }
}

/// Resolves on the next lifecycle change; never resolves once every handle is gone.
async fn next_lifecycle(control: &mut watch::Receiver<Lifecycle>) -> Lifecycle {
    if control.changed().await.is_err() {
        return std::future::pending().await;
    }
    *control.borrow_and_update()
}

async fn shutdown_requested(control: &mut watch::Receiver<Lifecycle>) {
    loop {
        if *control.borrow_and_update() == Lifecycle::Shutdown {
            return;
        }
        if control.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    decoder: &mut FrameDecoder,
    shared: &Shared,
) -> Failure {
    loop {
        loop {
            match decoder.decode(buf) {
                Ok(Some(frame)) => {
                    if let Err(failure) = shared.on_frame(frame) {
                        return failure;
                    }
                }
                Ok(None) => break,
                Err(err) => return Failure::Protocol(err),
            }
        }
        match reader.read_buf(buf).await {
            Ok(0) => return Failure::Eof,
            Ok(_) => {}
            Err(err) => return Failure::Io(err),
        }
    }
}

/// Connects and runs the handshake within `connect_timeout`.
async fn establish<C: Connector>(
    connector: &C,
    config: &ClientConfig,
    shared: &Shared,
) -> ClientResult<Session<C::Stream>> {
    debug!(addr = %config.addr, "connecting");
    let setup = async {
        let mut stream = connector.connect().await?;
        let mut decoder = FrameDecoder::new(config.max_frame_size);
        let mut read_buf = BytesMut::with_capacity(READ_BUF_SIZE);
        let version = handshake(&mut stream, &mut decoder, &mut read_buf, config, shared).await?;
        if version == ProtocolVersion::Resp3 {
            resubscribe(&mut stream, &mut decoder, &mut read_buf, shared).await?;
        } else {
            let dropped = shared.pushes.forget_subscriptions();
            if !dropped.is_empty() {
                warn!(addr = %config.addr, "server negotiated RESP2; subscriptions were not restored");
            }
        }
        Ok::<_, ClientError>((stream, decoder, read_buf, version))
    };
    let (stream, decoder, read_buf, version) = tokio::time::timeout(config.connect_timeout, setup)
        .await
        .map_err(|_| ConnectionError::ConnectTimeout(config.connect_timeout))??;

    shared.set_protocol(version);
    info!(addr = %config.addr, protocol = version.as_u8(), "connection ready");
    Ok(Session {
        stream,
        decoder,
        read_buf,
    })
}

/// Negotiates the protocol version and session settings.
async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    decoder: &mut FrameDecoder,
    read_buf: &mut BytesMut,
    config: &ClientConfig,
    shared: &Shared,
) -> ClientResult<ProtocolVersion> {
    let mut version = ProtocolVersion::Resp2;

    if config.protocol == ProtocolVersion::Resp3 {
        let mut hello = Command::new("HELLO").arg("3");
        if let Some(name) = &config.client_name {
            hello = hello.arg("SETNAME").arg(name.clone());
        }
        decoder.set_version(ProtocolVersion::Resp3);
        let reply = round_trip(stream, decoder, read_buf, &hello, shared).await?;
        if reply.is_error() {
            debug!(reply = ?reply, "server refused HELLO 3, staying on RESP2");
            decoder.set_version(ProtocolVersion::Resp2);
        } else {
            version = ProtocolVersion::Resp3;
        }
    }

    if version == ProtocolVersion::Resp2 {
        if let Some(name) = &config.client_name {
            let setname = Command::new("CLIENT").arg("SETNAME").arg(name.clone());
            expect_ok(round_trip(stream, decoder, read_buf, &setname, shared).await?, "CLIENT SETNAME")?;
        }
    }

    if config.database != 0 {
        let select = Command::new("SELECT").arg(config.database.to_string());
        expect_ok(round_trip(stream, decoder, read_buf, &select, shared).await?, "SELECT")?;
    }

    Ok(version)
}

/// Sends one setup command and waits for its reply; pushes are delivered as usual.
async fn round_trip<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    decoder: &mut FrameDecoder,
    read_buf: &mut BytesMut,
    command: &Command,
    shared: &Shared,
) -> ClientResult<Frame> {
    let mut out = BytesMut::new();
    encode_command(command, &mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;

    loop {
        while let Some(frame) = decoder.decode(read_buf)? {
            match frame {
                Frame::Push(items) => shared.on_push(PushMessage::from_frames(items)),
                reply => return Ok(reply),
            }
        }
        if stream.read_buf(read_buf).await? == 0 {
            return Err(unexpected_eof());
        }
    }
}

/// Subscribes a fresh socket to every channel confirmed on earlier ones and
/// waits for all confirmations.
async fn resubscribe<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    decoder: &mut FrameDecoder,
    read_buf: &mut BytesMut,
    shared: &Shared,
) -> ClientResult<()> {
    let commands = shared.pushes.active().restore_commands();
    if commands.is_empty() {
        return Ok(());
    }
    let mut out = BytesMut::new();
    let mut expected = 0usize;
    for command in &commands {
        encode_command(command, &mut out);
        expected += command.args().len();
    }
    info!(commands = commands.len(), channels = expected, "restoring subscriptions");
    stream.write_all(&out).await?;
    stream.flush().await?;

    loop {
        while expected > 0 {
            let Some(frame) = decoder.decode(read_buf)? else {
                break;
            };
            match frame {
                Frame::Push(items) => {
                    let message = PushMessage::from_frames(items);
                    if is_subscribe_confirmation(&message.kind) {
                        expected -= 1;
                    }
                    shared.on_push(message);
                }
                other => {
                    return Err(ConnectionError::Handshake(format!("resubscribe answered {:?}", other)).into());
                }
            }
        }
        if expected == 0 {
            return Ok(());
        }
        if stream.read_buf(read_buf).await? == 0 {
            return Err(unexpected_eof());
        }
    }
}

fn unexpected_eof() -> ClientError {
    ConnectionError::from(io::Error::from(io::ErrorKind::UnexpectedEof)).into()
}

fn expect_ok(reply: Frame, step: &str) -> ClientResult<()> {
    match reply {
        Frame::Simple(_) => Ok(()),
        other => Err(ConnectionError::Handshake(format!("{} answered {:?}", step, other)).into()),
    }
}
