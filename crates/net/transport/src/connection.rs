//! A multiplexed request/response connection to one backend.
//!
//! Callers enqueue payloads and get back a [`PendingResponse`]. A writer task
//! drains the queue onto the socket in id order; a reader task decodes
//! response frames and resolves the matching pending entries. Both tasks
//! re-establish the socket when it fails, see [`crate::link`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use chunknet_net_codec::{Frame, FrameCodec, FrameError};
use chunknet_primitives::HostAddress;
use parking_lot::Mutex;
use tokio::{
    io::AsyncWriteExt,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, debug_span, trace, warn};

use crate::{
    ConnectionState, Dialer, PendingResponse, PendingTable, RequestIdGenerator, TcpDialer,
    TransportConfig, TransportError,
    io::{read_frame, write_frame},
    link::{Handoff, Link, ReadSide, Redial, WriteSide},
    metrics::TransportMetrics,
};

enum Outgoing {
    /// A request whose response is awaited.
    Request(Frame),
    /// A final, unanswered frame written during close.
    Farewell(Frame),
}

struct Shared {
    host: HostAddress,
    config: TransportConfig,
    /// Zero disables idle reconnects.
    idle_timeout_ms: AtomicU64,
    ids: Arc<RequestIdGenerator>,
    pending: PendingTable,
    /// `None` once the connection stops accepting requests. Holding the lock
    /// while allocating an id and enqueueing keeps the queue in id order.
    outbound: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    closing: AtomicBool,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    link: Link,
    metrics: TransportMetrics,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if current.is_closed() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Resolves once the connection is closing.
    async fn stopped(&self) {
        let mut shutdown = self.shutdown.subscribe();
        if self.is_closing() {
            return;
        }
        let _ = shutdown.changed().await;
    }

    fn cannot_reconnect(&self, reason: impl fmt::Display) -> TransportError {
        TransportError::CannotReconnect {
            host: self.host.clone(),
            reason: reason.to_string(),
        }
    }

    fn record_pending(&self) {
        self.metrics.pending.set(self.pending.len() as f64);
    }

    fn purge_all(&self, reason: TransportError) {
        let purged = self.pending.purge_all(|_| reason.clone());
        self.metrics.record_purged(purged);
        self.record_pending();
    }

    /// Stop accepting work and fail everything in flight.
    fn fail(&self, reason: TransportError) {
        warn!(host = %self.host, %reason, "connection failed");
        self.closing.store(true, Ordering::Release);
        let outbound = self.outbound.lock().take();
        drop(outbound);
        let _ = self.shutdown.send(true);
        self.purge_all(reason);
        self.set_state(ConnectionState::Closed);
    }
}

struct Tasks {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// A connection to one backend over a single socket.
///
/// Any number of requests may be in flight. Responses are matched to
/// requests by id, and the socket is re-established transparently when it
/// fails or has been idle too long. Dropping the connection stops its tasks;
/// [`close`](Self::close) additionally waits for them.
pub struct Connection {
    shared: Arc<Shared>,
    tasks: Mutex<Option<Tasks>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.shared.host)
            .field("state", &self.state())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl Connection {
    /// Connect to `host` over plain TCP with a private id generator.
    pub async fn connect_tcp(
        host: HostAddress,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let dialer = Arc::new(TcpDialer::new(config.connect_timeout));
        Self::connect(host, dialer, config, Arc::new(RequestIdGenerator::new())).await
    }

    /// Dial `host` and start the reader and writer tasks.
    ///
    /// Fails with [`TransportError::Connect`] if the first dial fails.
    pub async fn connect(
        host: HostAddress,
        dialer: Arc<dyn Dialer>,
        config: TransportConfig,
        ids: Arc<RequestIdGenerator>,
    ) -> Result<Self, TransportError> {
        let (link, reader_handoff, writer_handoff) = Link::new(host.clone(), dialer);
        let (read, write) = link
            .dial_initial()
            .await
            .map_err(|e| TransportError::Connect {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let (outbound, queue) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connected);
        let (shutdown, _) = watch::channel(false);
        let idle_timeout_ms = u64::try_from(config.idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let codec = FrameCodec::new(config.max_frame_size);

        let shared = Arc::new(Shared {
            metrics: TransportMetrics::new(&host.to_string()),
            host: host.clone(),
            config,
            idle_timeout_ms: AtomicU64::new(idle_timeout_ms),
            ids,
            pending: PendingTable::new(),
            outbound: Mutex::new(Some(outbound)),
            closing: AtomicBool::new(false),
            state,
            shutdown,
            link,
        });

        let writer = Writer {
            shared: Arc::clone(&shared),
            queue,
            handoff: writer_handoff,
            half: Some(write),
            generation: 0,
            codec: codec.clone(),
            last_activity: Instant::now(),
            last_written: None,
        };
        let reader = Reader {
            shared: Arc::clone(&shared),
            handoff: reader_handoff,
            half: read,
            generation: 0,
            buf: BytesMut::new(),
            codec,
        };

        let tasks = Tasks {
            writer: tokio::spawn(writer.run().instrument(debug_span!("writer", %host))),
            reader: tokio::spawn(reader.run().instrument(debug_span!("reader", %host))),
        };
        debug!(%host, "connection established");

        Ok(Self {
            shared,
            tasks: Mutex::new(Some(tasks)),
        })
    }

    /// Backend this connection talks to.
    pub fn host(&self) -> &HostAddress {
        &self.shared.host
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether the connection has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Current idle timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.shared.idle_timeout()
    }

    /// Change the idle timeout; zero disables idle reconnects.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.shared.idle_timeout_ms.store(ms, Ordering::Relaxed);
    }

    /// Queue `payload` for sending and return the future of its response.
    ///
    /// Never blocks on the socket. Fails immediately once the connection is
    /// closed or when the payload cannot be framed.
    pub fn enqueue(&self, payload: Bytes) -> Result<PendingResponse, TransportError> {
        let max = self.shared.config.max_frame_size;
        if payload.len() > max {
            return Err(FrameError::TooLarge {
                len: payload.len(),
                max,
            }
            .into());
        }

        let outbound = self.shared.outbound.lock();
        let queue = outbound.as_ref().ok_or(TransportError::Closed)?;
        let id = self.shared.ids.next_id();
        let response = self.shared.pending.register(id)?;
        if queue.send(Outgoing::Request(Frame::new(id, payload))).is_err() {
            drop(outbound);
            self.shared.pending.fail(id, TransportError::Closed);
            return Err(TransportError::Closed);
        }
        drop(outbound);

        self.shared.metrics.requests_total.increment(1);
        self.shared.record_pending();
        trace!(host = %self.shared.host, id, "request enqueued");
        Ok(response)
    }

    /// Send `payload` and wait for its response.
    pub async fn request(&self, payload: Bytes) -> Result<Bytes, TransportError> {
        self.enqueue(payload)?.await
    }

    /// Shut the connection down.
    ///
    /// Writes `farewell` as a final unanswered frame when given, stops both
    /// tasks within the configured close timeout, resolves every pending
    /// request with [`TransportError::Closed`] and then publishes
    /// [`ConnectionState::Closed`]. Idempotent.
    pub async fn close(&self, farewell: Option<Bytes>) {
        self.shared.closing.store(true, Ordering::Release);
        let outbound = self.shared.outbound.lock().take();
        if let (Some(queue), Some(payload)) = (outbound, farewell) {
            let id = self.shared.ids.next_id();
            let _ = queue.send(Outgoing::Farewell(Frame::new(id, payload)));
        }
        let _ = self.shared.shutdown.send(true);

        let tasks = self.tasks.lock().take();
        if let Some(Tasks { writer, reader }) = tasks {
            let timeout = self.shared.config.close_timeout;
            join_bounded(writer, timeout, "writer", &self.shared.host).await;
            join_bounded(reader, timeout, "reader", &self.shared.host).await;
        }

        self.shared.purge_all(TransportError::Closed);
        self.shared.set_state(ConnectionState::Closed);
        debug!(host = %self.shared.host, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::Release);
        let outbound = self.shared.outbound.lock().take();
        drop(outbound);
        let _ = self.shared.shutdown.send(true);
    }
}

async fn join_bounded(
    mut handle: JoinHandle<()>,
    timeout: Duration,
    task: &'static str,
    host: &HostAddress,
) {
    if tokio::time::timeout(timeout, &mut handle).await.is_err() {
        warn!(%host, task, ?timeout, "task did not stop in time, aborting");
        handle.abort();
    }
}

enum WriterEvent {
    Handoff(Handoff<WriteSide>),
    Outgoing(Option<Outgoing>),
}

struct Writer {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedReceiver<Outgoing>,
    handoff: mpsc::UnboundedReceiver<Handoff<WriteSide>>,
    half: Option<WriteSide>,
    generation: u64,
    codec: FrameCodec,
    last_activity: Instant,
    /// Highest id written on the current socket.
    last_written: Option<u64>,
}

impl Writer {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                Some(handoff) = self.handoff.recv() => WriterEvent::Handoff(handoff),
                item = self.queue.recv() => WriterEvent::Outgoing(item),
            };

            match event {
                WriterEvent::Handoff(handoff) => self.adopt(handoff),
                WriterEvent::Outgoing(Some(Outgoing::Request(frame))) => {
                    if let Err(error) = self.send(frame).await {
                        self.shared.fail(error);
                        break;
                    }
                }
                WriterEvent::Outgoing(Some(Outgoing::Farewell(frame))) => {
                    if let Some(half) = self.half.as_mut()
                        && let Err(error) = write_frame(half, &mut self.codec, frame).await
                    {
                        debug!(%error, "farewell frame not delivered");
                    }
                }
                WriterEvent::Outgoing(None) => break,
            }
        }

        if let Some(mut half) = self.half.take() {
            let _ = half.shutdown().await;
        }
        trace!("writer stopped");
    }

    fn idle_expired(&self) -> bool {
        self.shared
            .idle_timeout()
            .is_some_and(|timeout| self.last_activity.elapsed() > timeout)
    }

    /// Write one request, reconnecting first when idle and once more on failure.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let id = frame.id;
        if self.half.is_none() || self.idle_expired() {
            debug!(id, "socket idle or missing, reconnecting before write");
            self.redial().await?;
        }

        let mut attempt = 0;
        loop {
            let half = self.half.as_mut().ok_or(TransportError::Closed)?;
            match write_frame(half, &mut self.codec, frame.clone()).await {
                Ok(()) => {
                    self.last_written = Some(id);
                    self.last_activity = Instant::now();
                    return Ok(());
                }
                Err(FrameError::Io(error)) => {
                    self.shared.metrics.write_failures_total.increment(1);
                    if attempt > 0 {
                        return Err(self.shared.cannot_reconnect(error));
                    }
                    warn!(id, %error, "write failed, reconnecting");
                    attempt += 1;
                    self.redial().await?;
                }
                Err(error) => {
                    // Not a socket failure: only this request is affected.
                    self.shared.pending.fail(id, error.into());
                    return Ok(());
                }
            }
        }
    }

    async fn redial(&mut self) -> Result<(), TransportError> {
        self.shared.set_state(ConnectionState::Connecting);
        if let Some(mut half) = self.half.take() {
            let _ = half.shutdown().await;
        }

        let redial = self
            .shared
            .link
            .redial(self.generation)
            .await
            .map_err(|e| self.shared.cannot_reconnect(e))?;
        match redial {
            Redial::Fresh {
                generation,
                read,
                write,
            } => {
                self.shared.link.give_reader(generation, read);
                self.adopt(Handoff {
                    generation,
                    half: write,
                });
                self.shared.metrics.reconnects_total.increment(1);
                debug!(generation, "reconnected");
            }
            Redial::Superseded => {
                let handoff = self.await_handoff().await?;
                self.adopt(handoff);
            }
        }
        self.shared.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn await_handoff(&mut self) -> Result<Handoff<WriteSide>, TransportError> {
        let mut newest = tokio::select! {
            handoff = self.handoff.recv() => handoff.ok_or(TransportError::Closed)?,
            () = self.shared.stopped() => return Err(TransportError::Closed),
        };
        while let Ok(newer) = self.handoff.try_recv() {
            newest = newer;
        }
        Ok(newest)
    }

    /// Switch to a newer socket, failing what was written on the old one.
    fn adopt(&mut self, handoff: Handoff<WriteSide>) {
        if handoff.generation <= self.generation && self.half.is_some() {
            return;
        }
        if let Some(last) = self.last_written.take() {
            let purged = self
                .shared
                .pending
                .purge_through(last, |id| TransportError::Reset { id });
            if purged > 0 {
                debug!(purged, last, "requests lost with the previous socket");
            }
            self.shared.metrics.record_purged(purged);
            self.shared.record_pending();
        }
        self.half = Some(handoff.half);
        self.generation = handoff.generation;
        self.last_activity = Instant::now();
    }
}

enum ReaderEvent {
    Stop,
    Handoff(Handoff<ReadSide>),
    Frame(Result<Frame, FrameError>),
}

struct Reader {
    shared: Arc<Shared>,
    handoff: mpsc::UnboundedReceiver<Handoff<ReadSide>>,
    half: ReadSide,
    generation: u64,
    buf: BytesMut,
    codec: FrameCodec,
}

impl Reader {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.shared.stopped() => ReaderEvent::Stop,
                Some(handoff) = self.handoff.recv() => ReaderEvent::Handoff(handoff),
                frame = read_frame(&mut self.half, &mut self.buf, &mut self.codec) => {
                    ReaderEvent::Frame(frame)
                }
            };

            match event {
                ReaderEvent::Stop => break,
                ReaderEvent::Handoff(handoff) => self.adopt(handoff),
                ReaderEvent::Frame(Ok(frame)) => self.deliver(frame),
                ReaderEvent::Frame(Err(error)) => {
                    if self.shared.is_closing() {
                        break;
                    }
                    if error.is_corruption() {
                        warn!(%error, "corrupt frame, resetting connection");
                    } else {
                        debug!(%error, "read failed, reconnecting");
                    }
                    if let Err(error) = self.redial().await {
                        self.shared.fail(error);
                        break;
                    }
                }
            }
        }
        trace!("reader stopped");
    }

    fn deliver(&mut self, frame: Frame) {
        let id = frame.id;
        if !self.shared.pending.resolve(id, frame.payload) {
            self.shared.metrics.discarded_total.increment(1);
            trace!(id, "discarding response with no pending request");
            return;
        }
        self.shared.metrics.responses_total.increment(1);

        // Responses arrive in id order, so anything older can no longer be answered.
        let purged = self
            .shared
            .pending
            .purge_before(id, |stale| TransportError::Abandoned { id: stale });
        if purged > 0 {
            debug!(purged, id, "requests overtaken by a newer response");
        }
        self.shared.metrics.record_purged(purged);
        self.shared.record_pending();
    }

    async fn redial(&mut self) -> Result<(), TransportError> {
        self.shared.set_state(ConnectionState::Connecting);
        let redial = self
            .shared
            .link
            .redial(self.generation)
            .await
            .map_err(|e| self.shared.cannot_reconnect(e))?;
        match redial {
            Redial::Fresh {
                generation,
                read,
                write,
            } => {
                self.shared.link.give_writer(generation, write);
                self.adopt(Handoff {
                    generation,
                    half: read,
                });
                self.shared.metrics.reconnects_total.increment(1);
                debug!(generation, "reconnected");
            }
            Redial::Superseded => {
                let mut newest = tokio::select! {
                    handoff = self.handoff.recv() => handoff.ok_or(TransportError::Closed)?,
                    () = self.shared.stopped() => return Err(TransportError::Closed),
                };
                while let Ok(newer) = self.handoff.try_recv() {
                    newest = newer;
                }
                self.adopt(newest);
            }
        }
        self.shared.set_state(ConnectionState::Connected);
        Ok(())
    }

    fn adopt(&mut self, handoff: Handoff<ReadSide>) {
        if handoff.generation <= self.generation {
            return;
        }
        self.half = handoff.half;
        self.generation = handoff.generation;
        self.buf.clear();
    }
}
