//! Emulator Server
//!
//! Owns the bar source and the order record sequence, and serves concurrent
//! client connections over TCP. Concurrency units: one accept task, one
//! handler task per connection, one streaming task per bar-stream request, so
//! a client can place orders while its stream is in progress.
//!
//! Shutdown is cooperative: cancelling the server's token stops the accept
//! loop (dropping the listener), unblocks every handler's read, and makes
//! outstanding streaming tasks stop within one iteration instead of draining
//! the remaining sequence.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::application::ports::BarSource;
use crate::domain::orders::{OrderRecord, OrderTicket};
use crate::infrastructure::config::EmulatorConfig;
use crate::infrastructure::wire::{self, FrameDecoder, WireMessage};

/// Fill status reported for every simulated order.
const FILL_STATUS: &str = "Filled";

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by the emulator server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound frame could not be encoded.
    #[error(transparent)]
    Wire(#[from] wire::WireError),
}

// =============================================================================
// Connections
// =============================================================================

/// One live client connection's outbound side.
///
/// The write half sits behind an async mutex so the handler (order replies)
/// and the streaming task (bar updates) serialize their writes; frames are
/// never interleaved mid-line.
#[derive(Debug)]
struct Connection {
    id: u64,
    peer: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

impl Connection {
    async fn send(&self, message: &WireMessage) -> Result<(), ServerError> {
        let line = wire::encode(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Registry of live connections.
///
/// Mutated concurrently by the accept path (insert) and handler exit paths
/// (remove); all access goes through explicit guarded operations.
#[derive(Debug, Default)]
struct ConnectionRegistry {
    inner: parking_lot::Mutex<HashMap<u64, Arc<Connection>>>,
}

impl ConnectionRegistry {
    fn insert(&self, connection: Arc<Connection>) {
        self.inner.lock().insert(connection.id, connection);
    }

    fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        self.inner.lock().remove(&id)
    }

    fn clear(&self) {
        self.inner.lock().clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

// =============================================================================
// Fill Simulation
// =============================================================================

/// Simulates synchronous order fills against the bar source.
///
/// Every order is assigned the next process-wide identifier (starting at 1)
/// and immediately reported fully filled at the source's closing price at
/// index `order_id`, clamped to the valid range. Records are retained for the
/// life of the process.
#[derive(Debug)]
pub struct FillEngine {
    next_order_id: AtomicU32,
    closes: Vec<Decimal>,
    records: parking_lot::Mutex<Vec<OrderRecord>>,
}

impl FillEngine {
    /// Create a fill engine over the source's closing prices.
    #[must_use]
    pub fn new(source: &dyn BarSource) -> Self {
        Self {
            next_order_id: AtomicU32::new(0),
            closes: source.bars().iter().map(|bar| bar.close).collect(),
            records: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Fill an order: allocate the next identifier and look up the price.
    pub fn fill(&self, ticket: OrderTicket) -> OrderRecord {
        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        let index = (order_id as usize).min(self.closes.len().saturating_sub(1));
        let fill_price = self.closes.get(index).copied().unwrap_or(Decimal::ZERO);

        let record = OrderRecord {
            order_id,
            action: ticket.action,
            quantity: ticket.quantity,
            fill_price,
        };
        self.records.lock().push(record);
        record
    }

    /// Number of orders filled so far.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Snapshot of all fill records.
    #[must_use]
    pub fn records(&self) -> Vec<OrderRecord> {
        self.records.lock().clone()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Handle for stopping a running [`EmulatorServer`] and awaiting its tasks.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ServerHandle {
    /// Request shutdown: the accept loop exits, live connections close, and
    /// streaming tasks stop within one iteration.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until every handler and streaming task has finished.
    pub async fn stopped(&self) {
        self.tracker.wait().await;
    }
}

/// The emulator server: accept loop plus per-connection handlers.
pub struct EmulatorServer {
    listener: TcpListener,
    bars: Arc<dyn BarSource>,
    fills: Arc<FillEngine>,
    registry: Arc<ConnectionRegistry>,
    bar_delay: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    next_connection_id: AtomicU64,
}

impl EmulatorServer {
    /// Bind the listening socket.
    ///
    /// Port 0 binds an ephemeral port; see [`Self::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn bind(
        config: &EmulatorConfig,
        bars: Arc<dyn BarSource>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let fills = Arc::new(FillEngine::new(bars.as_ref()));

        Ok(Self {
            listener,
            bars,
            fills,
            registry: Arc::new(ConnectionRegistry::default()),
            bar_delay: config.bar_delay,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_connection_id: AtomicU64::new(0),
        })
    }

    /// The bound listening address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a handle for stopping the server.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
        }
    }

    /// The fill engine, for inspecting retained order records.
    #[must_use]
    pub fn fill_engine(&self) -> Arc<FillEngine> {
        Arc::clone(&self.fills)
    }

    /// Number of currently registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Run the accept loop until shutdown.
    ///
    /// Consumes the server; the listener closes when this returns.
    ///
    /// # Errors
    ///
    /// Accept failures on individual connections are logged, not fatal; an
    /// error is only returned if the loop cannot continue at all.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.listener.local_addr()?, "Emulator listening");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::info!("Accept loop stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.accept_connection(stream, peer),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        // Handlers exit via the token; dropping registry entries releases the
        // write halves once streaming tasks finish.
        self.tracker.close();
        self.registry.clear();
        tracing::info!("Emulator stopped");
        Ok(())
    }

    fn accept_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (read_half, write_half) = stream.into_split();

        let connection = Arc::new(Connection {
            id,
            peer,
            writer: tokio::sync::Mutex::new(write_half),
        });
        self.registry.insert(Arc::clone(&connection));
        tracing::info!(connection = id, peer = %peer, "Client connected");

        let session = ConnectionSession {
            connection,
            registry: Arc::clone(&self.registry),
            bars: Arc::clone(&self.bars),
            fills: Arc::clone(&self.fills),
            bar_delay: self.bar_delay,
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
        };
        self.tracker.spawn(session.run(read_half));
    }
}

// =============================================================================
// Per-connection Handler
// =============================================================================

/// State shared by one connection's handler and its streaming tasks.
struct ConnectionSession {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    bars: Arc<dyn BarSource>,
    fills: Arc<FillEngine>,
    bar_delay: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionSession {
    /// Read and dispatch frames until disconnect, peer close, read error, or
    /// server shutdown. Always deregisters the connection on exit.
    async fn run(self, mut read_half: OwnedReadHalf) {
        use tokio::io::AsyncReadExt;

        let id = self.connection.id;
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];

        'session: loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::debug!(connection = id, "Handler stopping on shutdown");
                    break 'session;
                }
                read = read_half.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            tracing::info!(connection = id, "Peer closed connection");
                            break 'session;
                        }
                        Ok(n) => {
                            decoder.extend(&buf[..n]);
                            while let Some(frame) = decoder.next_frame() {
                                if !self.dispatch_frame(&frame).await {
                                    break 'session;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(connection = id, error = %e, "Read failed");
                            break 'session;
                        }
                    }
                }
            }
        }

        self.registry.remove(id);
        tracing::info!(connection = id, peer = %self.connection.peer, "Client disconnected");
    }

    /// Handle one frame. Returns `false` when the session must end.
    async fn dispatch_frame(&self, frame: &[u8]) -> bool {
        let id = self.connection.id;

        let message = match wire::decode_frame(frame) {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::debug!(
                    connection = id,
                    frame = %String::from_utf8_lossy(frame),
                    "Ignoring message of unknown type"
                );
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    connection = id,
                    error = %e,
                    frame = %String::from_utf8_lossy(frame),
                    "Dropping invalid frame"
                );
                return true;
            }
        };

        match message {
            WireMessage::ReqRealTimeBars { bar_size } => {
                tracing::info!(connection = id, bar_size, "Starting bar stream");
                let streamer = BarStreamer {
                    connection: Arc::clone(&self.connection),
                    bars: Arc::clone(&self.bars),
                    delay: self.bar_delay,
                    shutdown: self.shutdown.clone(),
                };
                self.tracker.spawn(streamer.run());
                true
            }
            WireMessage::PlaceOrder { order } => {
                let record = self.fills.fill(order);
                tracing::info!(
                    connection = id,
                    order_id = record.order_id,
                    action = record.action.as_str(),
                    quantity = record.quantity,
                    price = %record.fill_price,
                    "Order filled"
                );

                let status = WireMessage::OrderStatus {
                    order_id: record.order_id,
                    status: FILL_STATUS.to_string(),
                    avg_fill_price: record.fill_price,
                };
                if let Err(e) = self.connection.send(&status).await {
                    tracing::warn!(connection = id, error = %e, "Failed to send order status");
                    return false;
                }
                true
            }
            WireMessage::Disconnect => {
                tracing::info!(connection = id, "Client requested disconnect");
                false
            }
            WireMessage::BarUpdate { .. } | WireMessage::OrderStatus { .. }
            | WireMessage::EndOfData => {
                tracing::debug!(connection = id, "Ignoring server-bound message from client");
                true
            }
        }
    }
}

// =============================================================================
// Bar Streaming
// =============================================================================

/// Pushes the full bar sequence to one connection, then `endOfData`.
///
/// Runs independently of the handler's read loop so the client can place
/// orders while streaming is in progress. Does not close the connection; the
/// client decides what to do with `endOfData`.
struct BarStreamer {
    connection: Arc<Connection>,
    bars: Arc<dyn BarSource>,
    delay: Duration,
    shutdown: CancellationToken,
}

impl BarStreamer {
    async fn run(self) {
        let id = self.connection.id;

        for bar in self.bars.bars() {
            if self.shutdown.is_cancelled() {
                tracing::debug!(connection = id, "Bar stream stopping on shutdown");
                return;
            }

            let update = WireMessage::bar_update(bar);
            if let Err(e) = self.connection.send(&update).await {
                tracing::warn!(connection = id, error = %e, "Bar write failed, stopping stream");
                return;
            }
            tracing::trace!(connection = id, time = %bar.time, "Streamed bar");

            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::debug!(connection = id, "Bar stream stopping on shutdown");
                    return;
                }
                () = tokio::time::sleep(self.delay) => {}
            }
        }

        if let Err(e) = self.connection.send(&WireMessage::EndOfData).await {
            tracing::warn!(connection = id, error = %e, "Failed to send end of data");
            return;
        }
        tracing::info!(connection = id, bars = self.bars.len(), "Finished streaming bars");
    }
}
