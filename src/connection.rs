// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Abstract byte transports
//!
//! The transaction engine consumes any [`Connection`]: a byte stream
//! that accepts best-effort writes and reports everything else
//! (received bytes, faults, closure) through a single event channel.
//! [`StreamConnection`] adapts any tokio byte stream (TCP socket,
//! serial port, in-memory duplex) to that contract.

use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};

/// Events emitted by a [`Connection`].
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The underlying transport is ready.
    Open,
    /// A chunk of received bytes, in arrival order.
    Data(Bytes),
    /// A transport fault. Write failures surface here as well,
    /// never as a return value of [`Connection::write`].
    Error(io::Error),
    /// The transport closed; no more data will arrive.
    Closed,
}

/// An abstract byte transport.
///
/// One connection is exclusively held by one master; the master takes
/// the event channel when it attaches.
pub trait Connection: fmt::Debug + Send {
    /// Queue bytes for transmission. Best-effort and non-suspending:
    /// failures are reported asynchronously as
    /// [`ConnectionEvent::Error`].
    fn write(&mut self, bytes: Bytes);

    /// Whether the transport is currently usable.
    fn is_open(&self) -> bool;

    /// Hand out the event channel. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>>;

    /// Tear down the transport and release its resources.
    ///
    /// Must be idempotent: repeated calls do nothing, and the
    /// underlying close happens exactly once.
    fn destroy(&mut self);
}

/// Adapts a tokio byte stream to the [`Connection`] contract.
///
/// Spawns one reader and one writer task; both feed the event
/// channel. Dropping the adapter destroys it.
#[derive(Debug)]
pub struct StreamConnection {
    write_tx: Option<mpsc::UnboundedSender<Bytes>>,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    open: Arc<AtomicBool>,
    destroyed: bool,
}

impl StreamConnection {
    pub fn new<T>(stream: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Bytes>();
        let open = Arc::new(AtomicBool::new(true));
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let _ = event_tx.send(ConnectionEvent::Open);

        let reader = tokio::spawn({
            let event_tx = event_tx.clone();
            let open = Arc::clone(&open);
            async move {
                let mut chunk = BytesMut::with_capacity(4096);
                loop {
                    match read_half.read_buf(&mut chunk).await {
                        Ok(0) => {
                            open.store(false, Ordering::SeqCst);
                            let _ = event_tx.send(ConnectionEvent::Closed);
                            break;
                        }
                        Ok(_) => {
                            let _ = event_tx.send(ConnectionEvent::Data(chunk.split().freeze()));
                        }
                        Err(err) => {
                            open.store(false, Ordering::SeqCst);
                            let _ = event_tx.send(ConnectionEvent::Error(err));
                            let _ = event_tx.send(ConnectionEvent::Closed);
                            break;
                        }
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(bytes) = write_rx.recv().await {
                if let Err(err) = write_half.write_all(&bytes).await {
                    let _ = event_tx.send(ConnectionEvent::Error(err));
                    break;
                }
                if let Err(err) = write_half.flush().await {
                    let _ = event_tx.send(ConnectionEvent::Error(err));
                    break;
                }
            }
        });

        Self {
            write_tx: Some(write_tx),
            events: Some(event_rx),
            reader,
            writer,
            open,
            destroyed: false,
        }
    }
}

impl Connection for StreamConnection {
    fn write(&mut self, bytes: Bytes) {
        if let Some(tx) = &self.write_tx {
            // A failed send means the writer is gone, which has
            // already been reported through the event channel.
            let _ = tx.send(bytes);
        }
    }

    fn is_open(&self) -> bool {
        !self.destroyed && self.open.load(Ordering::SeqCst)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events.take()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.write_tx = None;
        self.reader.abort();
        self.writer.abort();
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Establish a TCP connection to a Modbus TCP device or gateway.
#[cfg(feature = "tcp")]
pub async fn connect_tcp(socket_addr: std::net::SocketAddr) -> io::Result<StreamConnection> {
    let stream = tokio::net::TcpStream::connect(socket_addr).await?;
    Ok(StreamConnection::new(stream))
}

/// A serial port connection for RTU or ASCII framing.
#[cfg(feature = "serial")]
pub type SerialConnection = StreamConnection;

/// Open a serial port and attach it to a connection.
#[cfg(feature = "serial")]
pub fn open_serial(builder: &tokio_serial::SerialPortBuilder) -> io::Result<SerialConnection> {
    let port = tokio_serial::SerialStream::open(builder)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(SerialConnection::new(port))
}
