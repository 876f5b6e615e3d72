//! Terminal Client
//!
//! Maintains one outbound connection to the emulator and exposes a
//! request/event surface to strategy code. Exactly one background receive
//! task owns the socket's read half and is its only reader; decoded messages
//! are delivered in order as typed events over a single-consumer channel.
//!
//! Disconnect is idempotent and safe from every path that needs it: the
//! receive task (end-of-data, read error, peer close), a failed send, and the
//! owner's shutdown path. Nothing joins the receive task while holding the
//! write lock, and the receive task never joins itself.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::market::Bar;
use crate::domain::orders::{OrderAction, OrderTicket};
use crate::infrastructure::wire::{self, FrameDecoder, WireMessage};

/// Bounded wait for the receive task to finish after shutdown is signaled.
const RECEIVE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by the terminal client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound frame could not be encoded.
    #[error(transparent)]
    Wire(#[from] wire::WireError),

    /// The client is not connected.
    #[error("not connected")]
    NotConnected,

    /// Order quantity must be positive.
    #[error("order quantity must be positive")]
    InvalidQuantity,
}

// =============================================================================
// Events
// =============================================================================

/// A fill result reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatusEvent {
    /// Server-assigned order identifier.
    pub order_id: u32,
    /// Fill status, e.g. `Filled`.
    pub status: String,
    /// Average fill price.
    pub avg_fill_price: Decimal,
}

/// Events delivered to the client's consumer, in receive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// One streamed bar.
    Bar(Bar),
    /// An order status update.
    OrderStatus(OrderStatusEvent),
    /// The bar sequence is exhausted; the client disconnects after this.
    EndOfData,
}

// =============================================================================
// Client
// =============================================================================

struct ClientInner {
    peer: SocketAddr,
    connected: AtomicBool,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    shutdown: CancellationToken,
    events: mpsc::Sender<TerminalEvent>,
    next_local_order_id: AtomicU32,
}

/// Client for the emulated trading terminal.
pub struct TerminalClient {
    inner: Arc<ClientInner>,
    receive_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TerminalClient {
    /// Connect and start the single background receive task.
    ///
    /// Decoded events are delivered on `events`. On failure the client stays
    /// disconnected and no task is started.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be opened.
    pub async fn connect(
        addr: SocketAddr,
        events: mpsc::Sender<TerminalEvent>,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let inner = Arc::new(ClientInner {
            peer: addr,
            connected: AtomicBool::new(true),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            shutdown: CancellationToken::new(),
            events,
            next_local_order_id: AtomicU32::new(0),
        });

        let receive_inner = Arc::clone(&inner);
        let handle = tokio::spawn(receive_loop(receive_inner, read_half));

        tracing::info!(peer = %addr, "Connected to emulator");
        Ok(Self {
            inner,
            receive_task: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// Whether the client currently considers itself connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Request a real-time bar stream from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn req_real_time_bars(&self, bar_size: u32) -> Result<(), ClientError> {
        self.inner
            .send(&WireMessage::ReqRealTimeBars { bar_size })
            .await?;
        tracing::info!(bar_size, "Requested real-time bars");
        Ok(())
    }

    /// Place an order.
    ///
    /// Returns a locally generated identifier immediately; the authoritative
    /// fill arrives later as a [`TerminalEvent::OrderStatus`] carrying the
    /// server-assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the quantity is zero or the frame cannot be sent.
    pub async fn place_order(
        &self,
        action: OrderAction,
        quantity: u32,
    ) -> Result<u32, ClientError> {
        if quantity == 0 {
            return Err(ClientError::InvalidQuantity);
        }

        let order = OrderTicket { action, quantity };
        self.inner.send(&WireMessage::PlaceOrder { order }).await?;

        let local_id = self.inner.next_local_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            local_id,
            action = action.as_str(),
            quantity,
            "Order submitted"
        );
        Ok(local_id)
    }

    /// Disconnect from the server.
    ///
    /// Idempotent: a second call is a logged no-op. Best-effort sends a
    /// disconnect notice, closes the write half, and signals shutdown.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Wait until shutdown has been signaled, then drain the receive task.
    ///
    /// The join is bounded by [`RECEIVE_JOIN_TIMEOUT`]; overrunning it is
    /// reported, not fatal. Ensures disconnect has run before returning.
    pub async fn run(&self) {
        self.inner.shutdown.cancelled().await;

        let handle = self.receive_task.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(RECEIVE_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Receive task panicked");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = RECEIVE_JOIN_TIMEOUT.as_millis(),
                        "Receive task did not exit in time"
                    );
                }
            }
        }

        // No-op if a receive-side path already disconnected.
        self.inner.disconnect().await;
        tracing::info!("Client stopped");
    }
}

impl ClientInner {
    /// Serialize and write one frame under the write lock.
    ///
    /// A write failure on a live connection triggers disconnect as a side
    /// effect, after the lock is released.
    async fn send(&self, message: &WireMessage) -> Result<(), ClientError> {
        let line = wire::encode(message)?;

        let write_result = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                None => return Err(ClientError::NotConnected),
                Some(writer) => writer.write_all(line.as_bytes()).await,
            }
        };

        if let Err(e) = write_result {
            tracing::warn!(error = %e, "Send failed, disconnecting");
            self.disconnect().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("Already disconnected");
            return;
        }

        {
            let mut guard = self.writer.lock().await;
            if let Some(writer) = guard.as_mut() {
                match wire::encode(&WireMessage::Disconnect) {
                    Ok(line) => {
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            tracing::debug!(error = %e, "Disconnect notice not delivered");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Disconnect notice not encoded");
                    }
                }
            }
            // Dropping the write half closes our side of the connection.
            *guard = None;
        }

        self.shutdown.cancel();
        tracing::info!(peer = %self.peer, "Disconnected from emulator");
    }
}

// =============================================================================
// Receive Task
// =============================================================================

/// The connection's only reader: buffers reads, decodes frames, and
/// dispatches typed events until end-of-data, peer close, read error, or
/// shutdown.
async fn receive_loop(inner: Arc<ClientInner>, mut read_half: OwnedReadHalf) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    'receive: loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => {
                break 'receive;
            }
            read = read_half.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        tracing::info!("Server closed the connection");
                        inner.disconnect().await;
                        break 'receive;
                    }
                    Ok(n) => {
                        decoder.extend(&buf[..n]);
                        while let Some(frame) = decoder.next_frame() {
                            if !dispatch_frame(&inner, &frame).await {
                                break 'receive;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Read failed");
                        inner.disconnect().await;
                        break 'receive;
                    }
                }
            }
        }
    }

    tracing::debug!("Receive task exiting");
}

/// Handle one inbound frame. Returns `false` when the task must exit.
async fn dispatch_frame(inner: &Arc<ClientInner>, frame: &[u8]) -> bool {
    let message = match wire::decode_frame(frame) {
        Ok(Some(message)) => message,
        Ok(None) => {
            tracing::debug!(
                frame = %String::from_utf8_lossy(frame),
                "Ignoring message of unknown type"
            );
            return true;
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                frame = %String::from_utf8_lossy(frame),
                "Dropping invalid frame"
            );
            return true;
        }
    };

    match message {
        WireMessage::BarUpdate {
            time,
            open,
            high,
            low,
            close,
        } => {
            let bar = Bar {
                time,
                open,
                high,
                low,
                close,
            };
            let _ = inner.events.send(TerminalEvent::Bar(bar)).await;
            true
        }
        WireMessage::OrderStatus {
            order_id,
            status,
            avg_fill_price,
        } => {
            let event = OrderStatusEvent {
                order_id,
                status,
                avg_fill_price,
            };
            let _ = inner.events.send(TerminalEvent::OrderStatus(event)).await;
            true
        }
        WireMessage::EndOfData => {
            tracing::info!("End of bar data");
            let _ = inner.events.send(TerminalEvent::EndOfData).await;
            inner.disconnect().await;
            false
        }
        WireMessage::ReqRealTimeBars { .. }
        | WireMessage::PlaceOrder { .. }
        | WireMessage::Disconnect => {
            tracing::debug!("Ignoring client-bound message from server");
            true
        }
    }
}
