//! Serving side of the frame transport.
//!
//! A connection is served strictly in order: one request is read, handled
//! and answered before the next is read, so response ids on a connection
//! never decrease.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chunknet_net_codec::{Frame, FrameCodec, FrameError};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, ToSocketAddrs},
    sync::watch,
    task::JoinHandle,
};
use tracing::{Instrument, debug, debug_span, info, warn};

use crate::{
    TransportConfig,
    io::{read_frame, write_frame},
};

/// What to do after handling a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send this payload back under the request's id.
    Respond(Bytes),
    /// Send nothing and end the connection.
    Close,
}

/// Turns request payloads into replies.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one request payload.
    async fn handle(&self, payload: Bytes) -> Reply;
}

/// Serve frames on `io` until the peer disconnects or the handler closes.
///
/// A clean end of stream between frames is not an error.
pub async fn serve_connection<S>(
    mut io: S,
    handler: &dyn FrameHandler,
    mut codec: FrameCodec,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    loop {
        let frame = match read_frame(&mut io, &mut buf, &mut codec).await {
            Ok(frame) => frame,
            Err(FrameError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof && buf.is_empty() => {
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        match handler.handle(frame.payload).await {
            Reply::Respond(payload) => {
                write_frame(&mut io, &mut codec, Frame::new(frame.id, payload)).await?;
            }
            Reply::Close => return Ok(()),
        }
    }
}

/// A TCP listener dispatching every accepted connection to a [`FrameHandler`].
#[derive(Debug)]
pub struct FrameServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    kill: watch::Sender<u64>,
    active: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
    accept: Option<JoinHandle<()>>,
}

impl FrameServer {
    /// Bind `addr` and start accepting.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        handler: Arc<dyn FrameHandler>,
        config: TransportConfig,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (kill, kill_rx) = watch::channel(0u64);
        let active = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let accept = tokio::spawn(
            accept_loop(
                listener,
                handler,
                FrameCodec::new(config.max_frame_size),
                shutdown_rx,
                kill_rx,
                Arc::clone(&active),
                Arc::clone(&accepted),
            )
            .instrument(debug_span!("frame_server", %local_addr)),
        );
        info!(%local_addr, "frame server listening");

        Ok(Self {
            local_addr,
            shutdown,
            kill,
            active,
            accepted,
            accept: Some(accept),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Number of connections accepted since binding.
    pub fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Drop every open connection without answering what is in flight.
    /// The listener keeps accepting.
    pub fn drop_connections(&self) {
        self.kill.send_modify(|epoch| *epoch += 1);
    }

    /// Stop accepting and drop every connection.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(accept) = self.accept.take() {
            let _ = accept.await;
        }
    }
}

impl Drop for FrameServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn FrameHandler>,
    codec: FrameCodec,
    mut shutdown: watch::Receiver<bool>,
    kill: watch::Receiver<u64>,
    active: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
) {
    loop {
        let incoming = tokio::select! {
            _ = shutdown.changed() => break,
            incoming = listener.accept() => incoming,
        };
        let (stream, peer) = match incoming {
            Ok(incoming) => incoming,
            Err(error) => {
                warn!(%error, "accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let handler = Arc::clone(&handler);
        let codec = codec.clone();
        let active = Arc::clone(&active);
        let mut stop = shutdown.clone();
        let mut kill = kill.clone();
        let _ = kill.borrow_and_update();

        accepted.fetch_add(1, Ordering::Relaxed);
        active.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(
            async move {
                tokio::select! {
                    result = serve_connection(stream, handler.as_ref(), codec) => {
                        if let Err(error) = result {
                            debug!(%error, "connection ended with error");
                        }
                    }
                    _ = stop.changed() => {}
                    _ = kill.changed() => debug!("connection dropped"),
                }
                active.fetch_sub(1, Ordering::Relaxed);
            }
            .instrument(debug_span!("serve", %peer)),
        );
    }
    debug!("frame server stopped accepting");
}
