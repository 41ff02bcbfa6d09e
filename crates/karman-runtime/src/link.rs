//! One framed connection over one byte stream.
//!
//! A link owns two tasks: a reader that feeds the [`Framer`] and decodes
//! messages, and a writer that drains the outbound queue. Both report
//! through a single event callback, normally a post onto the dispatcher.
//!
//! ```text
//!            ┌────────── reader task ──────────┐
//!  socket ──>│ read → Framer → Registry.decode │──> on_event(Message | Violation | Closed)
//!            └─────────────────────────────────┘
//!            ┌────────── writer task ──────────┐
//!  socket <──│ write_all ← outbound queue      │<── Link::send / Link::close
//!            └─────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - `Closed` is reported exactly once per link, whichever side notices first.
//! - Messages are reported in wire order.
//! - After a violation the reader stops; the owner decides whether to send a
//!   `Leave` before closing.
//! - A send after close is rejected without writing anything.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use bytes::Bytes;
use karman_core::{Connection, ConnectionError, ConnectionStatus, Endpoint, Transport};
use karman_proto::{Framer, Message, Registry};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, watch},
};
use tracing::{debug, trace, warn};
use uuid::Uuid;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// What a link reports to its owner
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A decoded message
    Message(Message),
    /// The peer broke the protocol; no further messages follow
    Violation(ConnectionError),
    /// The link is closed (reported once)
    Closed,
}

enum Outbound {
    Frame(Bytes),
    Close,
}

type EventSink = Box<dyn Fn(LinkEvent) + Send + Sync>;

struct Shared {
    id: Uuid,
    connection: Mutex<Connection>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: watch::Sender<bool>,
    on_event: EventSink,
}

impl Shared {
    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Close once: stop the reader, let the writer flush, report `Closed`.
    fn close(&self) {
        if !self.connection().disconnect() {
            return;
        }
        debug!(connection_id = %self.id, "link closed");
        let _ = self.outbound.send(Outbound::Close);
        let _ = self.closed.send(true);
        (self.on_event)(LinkEvent::Closed);
    }
}

/// Handle to a framed connection. Cheap to clone.
#[derive(Clone)]
pub struct Link {
    shared: Arc<Shared>,
    registry: Arc<Registry<Message>>,
    /// Only used to build outbound frames
    framer: Arc<Framer>,
}

impl Link {
    /// Start a link over an accepted stream.
    pub fn accept<S>(
        id: Uuid,
        stream: S,
        registry: Arc<Registry<Message>>,
        max_frame_size: usize,
        on_event: impl Fn(LinkEvent) + Send + Sync + 'static,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(Connection::accepted(id), stream, registry, max_frame_size, Box::new(on_event))
    }

    /// Dial `endpoint` and start a link over the new stream.
    ///
    /// # Errors
    ///
    /// `Transport` if the connection attempt fails.
    pub async fn connect<T: Transport>(
        transport: &T,
        endpoint: &Endpoint,
        id: Uuid,
        registry: Arc<Registry<Message>>,
        max_frame_size: usize,
        on_event: impl Fn(LinkEvent) + Send + Sync + 'static,
    ) -> Result<Self, ConnectionError> {
        let mut connection = Connection::new(id);
        match transport.connect(&endpoint.host, endpoint.port).await {
            Ok(stream) => {
                connection.connect_succeeded()?;
                debug!(connection_id = %id, endpoint = %endpoint, "connected");
                Ok(Self::start(connection, stream, registry, max_frame_size, Box::new(on_event)))
            },
            Err(err) => {
                connection.connect_failed()?;
                warn!(connection_id = %id, endpoint = %endpoint, error = %err, "connect failed");
                Err(err.into())
            },
        }
    }

    fn start<S>(
        connection: Connection,
        stream: S,
        registry: Arc<Registry<Message>>,
        max_frame_size: usize,
        on_event: EventSink,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared { id: connection.id(), connection: Mutex::new(connection), outbound, closed, on_event });

        let (reader, writer) = tokio::io::split(stream);
        let framer = Framer::with_max_frame_size(max_frame_size);
        tokio::spawn(read_loop(Arc::clone(&shared), reader, Arc::clone(&registry), framer, closed_rx));
        tokio::spawn(write_loop(Arc::clone(&shared), writer, outbound_rx));

        Self { shared, registry, framer: Arc::new(Framer::with_max_frame_size(max_frame_size)) }
    }

    /// Connection id
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.connection().status()
    }

    /// True while sends are accepted
    pub fn is_connected(&self) -> bool {
        self.shared.connection().is_connected()
    }

    /// Encode, frame and queue `message`.
    ///
    /// # Errors
    ///
    /// - `NotConnected` once the link is closed
    /// - `Protocol` if the message is unregistered, invalid or too large
    pub fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        self.shared.connection().ensure_sendable()?;

        let payload = self.registry.encode(message)?;
        let frame = self.framer.frame(&payload)?;
        trace!(connection_id = %self.shared.id, kind = message.kind(), bytes = frame.len(), "send");

        self.shared
            .outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ConnectionError::NotConnected(ConnectionStatus::Disconnected))
    }

    /// Close the link after flushing queued sends. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("id", &self.shared.id).field("status", &self.status()).finish()
    }
}

async fn read_loop<R>(
    shared: Arc<Shared>,
    mut reader: R,
    registry: Arc<Registry<Message>>,
    mut framer: Framer,
    mut closed: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            _ = closed.wait_for(|closed| *closed) => return,
        };

        let n = match read {
            Ok(0) => {
                debug!(connection_id = %shared.id, "peer closed");
                break;
            },
            Ok(n) => n,
            Err(err) => {
                debug!(connection_id = %shared.id, error = %err, "read failed");
                break;
            },
        };

        let frames = match framer.append(&buf[..n]) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(connection_id = %shared.id, error = %err, "framing violation");
                (shared.on_event)(LinkEvent::Violation(err.into()));
                return;
            },
        };

        for frame in frames {
            match registry.decode(&frame) {
                Ok(message) => {
                    trace!(connection_id = %shared.id, kind = message.kind(), "recv");
                    (shared.on_event)(LinkEvent::Message(message));
                },
                Err(err) => {
                    warn!(connection_id = %shared.id, error = %err, "undecodable message");
                    (shared.on_event)(LinkEvent::Violation(err.into()));
                    return;
                },
            }
        }
    }

    shared.close();
}

async fn write_loop<W>(shared: Arc<Shared>, mut writer: W, mut outbound: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = outbound.recv().await {
        match command {
            Outbound::Frame(frame) => {
                if let Err(err) = writer.write_all(&frame).await {
                    debug!(connection_id = %shared.id, error = %err, "write failed");
                    shared.close();
                    break;
                }
            },
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
}
