//! Client/Server Session Tests
//!
//! Exercises the full wire protocol over real sockets: bar streaming,
//! synchronous fills, disconnect handling, and shutdown behavior.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, TimeZone};
use rust_decimal::Decimal;
use terminal_emulator::{
    Bar, BarSeries, ClientError, EmulatorConfig, EmulatorServer, OrderAction, ServerHandle,
    TerminalClient, TerminalEvent,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn test_series(closes: &[i64]) -> BarSeries {
    let offset = FixedOffset::west_opt(5 * 3600).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            time: offset
                .timestamp_opt(1_700_000_000 + (i as i64) * 5, 0)
                .unwrap(),
            open: Decimal::from(close),
            high: Decimal::from(close + 1),
            low: Decimal::from(close - 1),
            close: Decimal::from(close),
        })
        .collect();
    BarSeries::new(bars)
}

/// Start a server on an ephemeral port and return its handle and address.
async fn start_server(series: BarSeries, bar_delay: Duration) -> (ServerHandle, SocketAddr) {
    let config = EmulatorConfig {
        port: 0,
        bar_delay,
        ..EmulatorConfig::default()
    };

    let server = EmulatorServer::bind(&config, Arc::new(series)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    tokio::spawn(server.run());

    (handle, addr)
}

async fn connect(addr: SocketAddr) -> (TerminalClient, mpsc::Receiver<TerminalEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let client = TerminalClient::connect(addr, tx).await.unwrap();
    (client, rx)
}

async fn next_event(rx: &mut mpsc::Receiver<TerminalEvent>) -> TerminalEvent {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn streams_all_bars_in_order_then_one_end_of_data() {
    let (handle, addr) = start_server(test_series(&[100, 101, 102]), Duration::from_millis(1)).await;
    let (client, mut rx) = connect(addr).await;

    client.req_real_time_bars(5).await.unwrap();

    let mut closes = Vec::new();
    loop {
        match next_event(&mut rx).await {
            TerminalEvent::Bar(bar) => closes.push(bar.close),
            TerminalEvent::EndOfData => break,
            TerminalEvent::OrderStatus(status) => panic!("unexpected order status: {status:?}"),
        }
    }

    assert_eq!(
        closes,
        vec![Decimal::from(100), Decimal::from(101), Decimal::from(102)]
    );

    // End-of-data triggers a client-initiated disconnect; run() drains it.
    timeout(RECV_TIMEOUT, client.run()).await.unwrap();
    assert!(!client.is_connected());

    // Exactly one end-of-stream observation: nothing further arrives.
    drop(client);
    while let Some(event) = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap() {
        assert!(!matches!(event, TerminalEvent::EndOfData));
    }

    handle.shutdown();
}

#[tokio::test]
async fn bars_preserve_source_timestamp_order() {
    let (handle, addr) = start_server(test_series(&[5, 6, 7, 8]), Duration::from_millis(1)).await;
    let (client, mut rx) = connect(addr).await;

    client.req_real_time_bars(5).await.unwrap();

    let mut times = Vec::new();
    loop {
        match next_event(&mut rx).await {
            TerminalEvent::Bar(bar) => times.push(bar.time),
            TerminalEvent::EndOfData => break,
            TerminalEvent::OrderStatus(status) => panic!("unexpected order status: {status:?}"),
        }
    }

    assert_eq!(times.len(), 4);
    assert!(times.windows(2).all(|pair| pair[0] < pair[1]));

    handle.shutdown();
}

#[tokio::test]
async fn first_order_fills_at_index_one_with_id_one() {
    let (handle, addr) = start_server(test_series(&[100, 101, 102]), Duration::from_millis(1)).await;
    let (client, mut rx) = connect(addr).await;

    // No bars have streamed yet; the fill is still synchronous.
    let local_id = client.place_order(OrderAction::Buy, 10).await.unwrap();
    assert_eq!(local_id, 1);

    match next_event(&mut rx).await {
        TerminalEvent::OrderStatus(status) => {
            assert_eq!(status.order_id, 1);
            assert_eq!(status.status, "Filled");
            assert_eq!(status.avg_fill_price, Decimal::from(101));
        }
        other => panic!("expected order status, got {other:?}"),
    }

    client.disconnect().await;
    handle.shutdown();
}

#[tokio::test]
async fn order_ids_increase_and_fill_prices_clamp() {
    let (handle, addr) = start_server(test_series(&[100, 101, 102]), Duration::from_millis(1)).await;
    let (client, mut rx) = connect(addr).await;

    for _ in 0..4 {
        client.place_order(OrderAction::Sell, 1).await.unwrap();
    }

    let mut statuses = Vec::new();
    for _ in 0..4 {
        match next_event(&mut rx).await {
            TerminalEvent::OrderStatus(status) => statuses.push(status),
            other => panic!("expected order status, got {other:?}"),
        }
    }

    let ids: Vec<u32> = statuses.iter().map(|s| s.order_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let prices: Vec<Decimal> = statuses.iter().map(|s| s.avg_fill_price).collect();
    // Index is the order id clamped to the last bar.
    assert_eq!(
        prices,
        vec![
            Decimal::from(101),
            Decimal::from(102),
            Decimal::from(102),
            Decimal::from(102)
        ]
    );

    client.disconnect().await;
    handle.shutdown();
}

#[tokio::test]
async fn orders_fill_while_stream_is_in_progress() {
    let (handle, addr) = start_server(test_series(&[100, 101, 102, 103, 104]), Duration::from_millis(50)).await;
    let (client, mut rx) = connect(addr).await;

    client.req_real_time_bars(5).await.unwrap();

    // Wait for the stream to start, then place an order mid-stream.
    match next_event(&mut rx).await {
        TerminalEvent::Bar(_) => {}
        other => panic!("expected a bar first, got {other:?}"),
    }
    client.place_order(OrderAction::Buy, 2).await.unwrap();

    let mut saw_status = false;
    let mut bars = 1;
    loop {
        match next_event(&mut rx).await {
            TerminalEvent::Bar(_) => bars += 1,
            TerminalEvent::OrderStatus(status) => {
                assert_eq!(status.order_id, 1);
                saw_status = true;
            }
            TerminalEvent::EndOfData => break,
        }
    }

    assert!(saw_status, "order status never arrived during the stream");
    assert_eq!(bars, 5);

    handle.shutdown();
}

#[tokio::test]
async fn failed_connect_leaves_no_client_behind() {
    // Bind then drop a listener so the port is known to be closed.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, _rx) = mpsc::channel(8);
    assert!(matches!(
        TerminalClient::connect(addr, tx).await,
        Err(ClientError::Io(_))
    ));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (handle, addr) = start_server(test_series(&[100]), Duration::from_millis(1)).await;
    let (client, _rx) = connect(addr).await;

    assert!(client.is_connected());
    client.disconnect().await;
    assert!(!client.is_connected());

    // Second disconnect is a no-op, not an error.
    client.disconnect().await;
    assert!(!client.is_connected());

    timeout(RECV_TIMEOUT, client.run()).await.unwrap();
    handle.shutdown();
}

#[tokio::test]
async fn send_after_disconnect_reports_not_connected() {
    let (handle, addr) = start_server(test_series(&[100]), Duration::from_millis(1)).await;
    let (client, _rx) = connect(addr).await;

    client.disconnect().await;

    assert!(matches!(
        client.req_real_time_bars(5).await,
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.place_order(OrderAction::Buy, 1).await,
        Err(ClientError::NotConnected)
    ));

    handle.shutdown();
}

#[tokio::test]
async fn zero_quantity_orders_are_rejected_locally() {
    let (handle, addr) = start_server(test_series(&[100]), Duration::from_millis(1)).await;
    let (client, _rx) = connect(addr).await;

    assert!(matches!(
        client.place_order(OrderAction::Buy, 0).await,
        Err(ClientError::InvalidQuantity)
    ));

    client.disconnect().await;
    handle.shutdown();
}

#[tokio::test]
async fn server_stop_mid_stream_ends_session_without_end_of_data() {
    let closes: Vec<i64> = (0..200).map(|i| 100 + i).collect();
    let (handle, addr) = start_server(test_series(&closes), Duration::from_millis(20)).await;
    let (client, mut rx) = connect(addr).await;

    client.req_real_time_bars(5).await.unwrap();

    // Let the stream get going, then pull the plug.
    match next_event(&mut rx).await {
        TerminalEvent::Bar(_) => {}
        other => panic!("expected a bar, got {other:?}"),
    }
    handle.shutdown();

    // The peer close unblocks the client, which disconnects on its own.
    timeout(RECV_TIMEOUT, client.run()).await.unwrap();
    assert!(!client.is_connected());

    drop(client);
    while let Some(event) = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap() {
        assert!(
            !matches!(event, TerminalEvent::EndOfData),
            "stream must not complete after server stop"
        );
    }
}

#[tokio::test]
async fn malformed_and_unknown_frames_leave_the_connection_usable() {
    let (handle, addr) = start_server(test_series(&[100, 101, 102]), Duration::from_millis(1)).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"this is not json\n").await.unwrap();
    write_half
        .write_all(b"{\"type\":\"mystery\",\"payload\":1}\n")
        .await
        .unwrap();
    write_half
        .write_all(b"{\"type\":\"placeOrder\",\"order\":{\"action\":\"SELL\",\"quantity\":3}}\n")
        .await
        .unwrap();

    let mut line = String::new();
    timeout(RECV_TIMEOUT, reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();

    let reply: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["type"], "orderStatus");
    assert_eq!(reply["orderId"], 1);
    assert_eq!(reply["status"], "Filled");

    handle.shutdown();
}

#[tokio::test]
async fn peer_vanishing_does_not_disturb_other_sessions() {
    let (handle, addr) = start_server(test_series(&[100, 101]), Duration::from_millis(1)).await;

    // A peer that connects and silently goes away.
    let ghost = TcpStream::connect(addr).await.unwrap();
    drop(ghost);

    // A well-behaved session still works end to end.
    let (client, mut rx) = connect(addr).await;
    client.req_real_time_bars(5).await.unwrap();

    let mut bars = 0;
    loop {
        match next_event(&mut rx).await {
            TerminalEvent::Bar(_) => bars += 1,
            TerminalEvent::EndOfData => break,
            TerminalEvent::OrderStatus(status) => panic!("unexpected order status: {status:?}"),
        }
    }
    assert_eq!(bars, 2);

    handle.shutdown();
}
