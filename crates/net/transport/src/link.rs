//! Socket ownership shared by the reader and writer tasks.
//!
//! Either task may notice that the socket is broken. Redials are serialised
//! on a generation counter so that only one dial happens per broken socket:
//! the task that dials keeps its half of the new stream and hands the other
//! half to its partner; a task that finds the generation already advanced
//! waits for its hand-off instead of dialing again.

use std::{io, sync::Arc};

use chunknet_primitives::HostAddress;
use tokio::{
    io::{ReadHalf, WriteHalf},
    sync::{Mutex, mpsc},
};

use crate::{BoxedIo, Dialer};

pub(crate) type ReadSide = ReadHalf<BoxedIo>;
pub(crate) type WriteSide = WriteHalf<BoxedIo>;

/// One half of a stream, tagged with the generation it belongs to.
pub(crate) struct Handoff<T> {
    pub(crate) generation: u64,
    pub(crate) half: T,
}

pub(crate) enum Redial {
    /// This task dialed; it owns both halves of generation `generation`.
    Fresh {
        generation: u64,
        read: ReadSide,
        write: WriteSide,
    },
    /// The partner already replaced the socket; its hand-off is on the way.
    Superseded,
}

pub(crate) struct Link {
    host: HostAddress,
    dialer: Arc<dyn Dialer>,
    generation: Mutex<u64>,
    to_reader: mpsc::UnboundedSender<Handoff<ReadSide>>,
    to_writer: mpsc::UnboundedSender<Handoff<WriteSide>>,
}

impl Link {
    pub(crate) fn new(
        host: HostAddress,
        dialer: Arc<dyn Dialer>,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Handoff<ReadSide>>,
        mpsc::UnboundedReceiver<Handoff<WriteSide>>,
    ) {
        let (to_reader, reader_rx) = mpsc::unbounded_channel();
        let (to_writer, writer_rx) = mpsc::unbounded_channel();
        let link = Self {
            host,
            dialer,
            generation: Mutex::new(0),
            to_reader,
            to_writer,
        };
        (link, reader_rx, writer_rx)
    }

    /// Dial the generation-0 stream.
    pub(crate) async fn dial_initial(&self) -> io::Result<(ReadSide, WriteSide)> {
        let io = self.dialer.dial(&self.host).await?;
        Ok(tokio::io::split(io))
    }

    /// Replace the socket of generation `seen`, unless that already happened.
    pub(crate) async fn redial(&self, seen: u64) -> io::Result<Redial> {
        let mut current = self.generation.lock().await;
        if *current != seen {
            return Ok(Redial::Superseded);
        }
        let io = self.dialer.dial(&self.host).await?;
        *current += 1;
        let (read, write) = tokio::io::split(io);
        Ok(Redial::Fresh {
            generation: *current,
            read,
            write,
        })
    }

    pub(crate) fn give_reader(&self, generation: u64, half: ReadSide) {
        let _ = self.to_reader.send(Handoff { generation, half });
    }

    pub(crate) fn give_writer(&self, generation: u64, half: WriteSide) {
        let _ = self.to_writer.send(Handoff { generation, half });
    }
}
