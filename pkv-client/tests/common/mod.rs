#![allow(dead_code)]

use std::future::Future;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pkv_client::{BackoffConfig, Client, ClientConfig, ConnectionState, Connector, ProtocolVersion};
use pkv_common::{encode_frame, Frame, FrameDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Config for in-process tests: RESP2 (no handshake) and fast reconnects.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        addr: "mock".to_string(),
        connect_timeout: Duration::from_secs(2),
        command_timeout: Some(Duration::from_secs(5)),
        backoff: BackoffConfig {
            floor: Duration::from_millis(5),
            cap: Duration::from_millis(50),
            jitter: 0.0,
        },
        protocol: ProtocolVersion::Resp2,
        ..ClientConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Hands the server half of every new in-memory connection to the test.
pub struct DuplexConnector {
    accepted: mpsc::UnboundedSender<DuplexStream>,
    capacity: usize,
    switch: Switch,
}

/// Test-side control over a `DuplexConnector` after it moved into a client.
#[derive(Clone, Default)]
pub struct Switch {
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl Switch {
    /// Makes every following connect fail with `ConnectionRefused`.
    pub fn refuse(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Connect calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl DuplexConnector {
    pub fn switch(&self) -> Switch {
        self.switch.clone()
    }

    fn open(&self) -> std::io::Result<DuplexStream> {
        self.switch.attempts.fetch_add(1, Ordering::SeqCst);
        if self.switch.refusing.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        }
        let (client, server) = tokio::io::duplex(self.capacity);
        self.accepted
            .send(server)
            .map(|_| client)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "acceptor gone"))
    }
}

impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    fn connect(&self) -> impl Future<Output = std::io::Result<DuplexStream>> + Send {
        let result = self.open();
        async move { result }
    }
}

pub struct Acceptor {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Acceptor {
    pub async fn accept(&mut self) -> MockConn {
        let stream = tokio::time::timeout(Duration::from_secs(5), self.incoming.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped");
        MockConn {
            stream,
            decoder: FrameDecoder::new(64 * 1024 * 1024),
            buf: BytesMut::new(),
        }
    }

    /// Resolves once the connector is dropped, i.e. its driver task ended.
    pub async fn closed(&mut self) {
        while self.incoming.recv().await.is_some() {}
    }
}

pub fn duplex(capacity: usize) -> (DuplexConnector, Acceptor) {
    let (accepted, incoming) = mpsc::unbounded_channel();
    let connector = DuplexConnector {
        accepted,
        capacity,
        switch: Switch::default(),
    };
    (connector, Acceptor { incoming })
}

/// Server side of one in-memory connection.
pub struct MockConn {
    stream: DuplexStream,
    decoder: FrameDecoder,
    buf: BytesMut,
}

impl MockConn {
    /// Next command as its arguments, or `None` once the client hung up.
    pub async fn read_command(&mut self) -> Option<Vec<Bytes>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf).expect("client sent a bad frame") {
                let Frame::Array(Some(items)) = frame else {
                    panic!("expected an array command, got {:?}", frame);
                };
                return Some(
                    items
                        .into_iter()
                        .map(|item| item.as_bytes().cloned().expect("bulk argument"))
                        .collect(),
                );
            }
            if self.stream.read_buf(&mut self.buf).await.ok()? == 0 {
                return None;
            }
        }
    }

    pub async fn expect_command(&mut self) -> Vec<Bytes> {
        tokio::time::timeout(Duration::from_secs(5), self.read_command())
            .await
            .expect("no command arrived")
            .expect("client hung up")
    }

    pub async fn send(&mut self, frame: &Frame) {
        let mut out = BytesMut::new();
        encode_frame(frame, &mut out);
        self.send_raw(&out).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to client");
    }

    /// Answers `HELLO 3` either as a RESP3 server or as a RESP2-only one.
    pub async fn answer_hello(&mut self, resp3: bool) {
        let hello = self.expect_command().await;
        assert_eq!(hello[0].as_ref(), b"HELLO");
        if resp3 {
            let info = Frame::Map(vec![
                (Frame::bulk("server"), Frame::bulk("mock")),
                (Frame::bulk("proto"), Frame::Integer(3)),
            ]);
            self.send(&info).await;
        } else {
            self.send(&Frame::Error(Bytes::from_static(b"ERR unknown command 'HELLO'"))).await;
        }
    }
}

pub async fn wait_for_state(client: &Client, expected: ConnectionState) {
    for _ in 0..500 {
        if client.state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("client never reached {:?}, stuck in {:?}", expected, client.state());
}

/// Blocking TCP server answering `expected_commands` commands on one connection.
pub fn spawn_server<F>(expected_commands: usize, handler: F) -> String
where
    F: Fn(usize, Vec<Vec<u8>>, &mut TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
        // Hold the socket until the client hangs up.
        let mut sink = [0u8; 64];
        while matches!(reader.read(&mut sink), Ok(n) if n > 0) {}
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "length"))
}

pub fn write_simple(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("+{}\r\n", msg).as_bytes());
}

pub fn write_error(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("-{}\r\n", msg).as_bytes());
}

pub fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(format!("${}\r\n", data.len()).as_bytes());
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
}

pub fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(format!(":{}\r\n", value).as_bytes());
}
