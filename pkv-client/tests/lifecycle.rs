mod common;

use std::time::Duration;

use common::{duplex, init_tracing, test_config, wait_for_state};
use pkv_client::{
    BackoffConfig, Client, ClientConfig, ClientError, Command, ConnectionError, ConnectionState, Frame,
    ProtocolVersion,
};

/// Backoff long enough for `wait_for_state` to observe `Reconnecting`.
fn slow_backoff() -> ClientConfig {
    ClientConfig {
        backoff: BackoffConfig {
            floor: Duration::from_millis(60),
            cap: Duration::from_millis(60),
            jitter: 0.0,
        },
        ..test_config()
    }
}

#[tokio::test]
async fn close_finishes_while_the_server_is_unreachable() {
    init_tracing();
    let (connector, _acceptor) = duplex(4096);
    let switch = connector.switch();
    switch.refuse(true);
    let client = Client::with_connector(slow_backoff(), connector).unwrap();
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    tokio::time::timeout(Duration::from_secs(2), client.close())
        .await
        .expect("close() hung while reconnecting");
    assert_eq!(client.state(), ConnectionState::Closed);
    let err = client.invoke(Command::new("PING")).unwrap_err();
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn dropping_every_handle_stops_a_reconnecting_driver() {
    let (connector, mut acceptor) = duplex(4096);
    let switch = connector.switch();
    switch.refuse(true);
    let client = Client::with_connector(slow_backoff(), connector).unwrap();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    let other = client.clone();
    drop(client);
    drop(other);

    tokio::time::timeout(Duration::from_secs(2), acceptor.closed())
        .await
        .expect("driver kept reconnecting after every handle was dropped");
    let attempts = switch.attempts();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(switch.attempts(), attempts);
}

#[tokio::test]
async fn refused_connects_back_off_then_become_ready() {
    init_tracing();
    let (connector, mut acceptor) = duplex(4096);
    let switch = connector.switch();
    switch.refuse(true);
    let client = Client::with_connector(slow_backoff(), connector).unwrap();

    wait_for_state(&client, ConnectionState::Reconnecting).await;
    // Accepted while disconnected; written once a socket exists.
    let get = client.invoke(Command::new("GET").key("k")).unwrap();
    while switch.attempts() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    switch.refuse(false);

    let mut conn = acceptor.accept().await;
    client.wait_ready().await.unwrap();
    assert_eq!(conn.expect_command().await[1].as_ref(), b"k");
    conn.send(&Frame::bulk("v")).await;
    assert_eq!(get.await.unwrap(), Frame::bulk("v"));

    let stats = client.stats();
    // Refused attempts never count as connects.
    assert_eq!(stats.reconnects, 0);
    assert_eq!(stats.commands_sent, 1);
    assert!(switch.attempts() >= 4);
}

#[tokio::test]
async fn stalled_handshake_times_out_and_retries() {
    init_tracing();
    let config = ClientConfig {
        protocol: ProtocolVersion::Resp3,
        connect_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let (connector, mut acceptor) = duplex(4096);
    let client = Client::with_connector(config, connector).unwrap();
    let get = client.invoke(Command::new("GET").key("k")).unwrap();

    // Read HELLO but never answer it.
    let mut stalled = acceptor.accept().await;
    assert_eq!(stalled.expect_command().await[0].as_ref(), b"HELLO");
    assert_eq!(client.state(), ConnectionState::Connecting);

    let mut conn = acceptor.accept().await;
    // The timed out socket was dropped without sending anything else.
    assert!(stalled.read_command().await.is_none());
    conn.answer_hello(true).await;
    client.wait_ready().await.unwrap();

    assert_eq!(conn.expect_command().await[1].as_ref(), b"k");
    conn.send(&Frame::bulk("v")).await;
    assert_eq!(get.await.unwrap(), Frame::bulk("v"));
}

#[tokio::test]
async fn close_while_reconnecting_replays_pending_commands_first() {
    init_tracing();
    let (connector, mut acceptor) = duplex(4096);
    let switch = connector.switch();
    let client = Client::with_connector(slow_backoff(), connector).unwrap();

    let mut first = acceptor.accept().await;
    let get = client.invoke(Command::new("GET").key("k")).unwrap();
    first.expect_command().await;
    switch.refuse(true);
    drop(first);
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let close = client.close();
    tokio::pin!(close);
    // Still waiting on the replayable GET.
    assert!(tokio::time::timeout(Duration::from_millis(150), &mut close).await.is_err());
    let err = client.invoke(Command::new("PING")).unwrap_err();
    assert!(matches!(err, ClientError::Connection(ConnectionError::Closing)));

    switch.refuse(false);
    let mut second = acceptor.accept().await;
    assert_eq!(second.expect_command().await[1].as_ref(), b"k");
    assert_eq!(client.state(), ConnectionState::Draining);
    second.send(&Frame::bulk("v")).await;

    assert_eq!(get.await.unwrap(), Frame::bulk("v"));
    tokio::time::timeout(Duration::from_secs(2), close)
        .await
        .expect("drain never finished");
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.stats().replayed, 1);
    // The drained socket is shut down from the client side.
    assert!(second.read_command().await.is_none());
}
