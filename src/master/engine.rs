// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::Instant,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    codec,
    connection::{Connection, ConnectionEvent},
    error::Error,
    frame::{Request, RequestPdu, Response},
    master::{Command, Config, ExecuteOptions, Framing, MasterEvent},
    slave::SlaveId,
};

/// One submitted request on its way through
/// `Queued → InFlight → (Completed | Retrying | Failed)`.
#[derive(Debug)]
struct Transaction {
    request: Request,
    unit: SlaveId,
    timeout: Duration,
    retries_left: u8,
    done: oneshot::Sender<Result<Response, Error>>,
}

#[derive(Debug)]
struct InFlight {
    transaction_id: Option<u16>,
    deadline: Instant,
    txn: Transaction,
}

#[derive(Debug)]
enum Framer {
    #[cfg(feature = "rtu")]
    Rtu(codec::rtu::ClientCodec),
    #[cfg(feature = "ascii")]
    Ascii(codec::ascii::ClientCodec),
    #[cfg(feature = "tcp")]
    Tcp(codec::tcp::ClientCodec),
}

/// A decoded frame, transport differences erased: serial framings
/// have no transaction id.
type Frame = (SlaveId, Option<u16>, Bytes);

impl Framer {
    fn wrap(
        &mut self,
        request: &Request,
        unit: SlaveId,
        transaction_id: Option<u16>,
    ) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        match self {
            #[cfg(feature = "rtu")]
            Self::Rtu(codec) => {
                use crate::frame::rtu::{Header, RequestAdu};
                codec.encode(
                    RequestAdu {
                        hdr: Header { slave_id: unit },
                        pdu: RequestPdu(request.clone()),
                    },
                    &mut buf,
                )?;
            }
            #[cfg(feature = "ascii")]
            Self::Ascii(codec) => {
                use crate::frame::ascii::{Header, RequestAdu};
                codec.encode(
                    RequestAdu {
                        hdr: Header { slave_id: unit },
                        pdu: RequestPdu(request.clone()),
                    },
                    &mut buf,
                )?;
            }
            #[cfg(feature = "tcp")]
            Self::Tcp(codec) => {
                use crate::frame::tcp::{Header, RequestAdu};
                codec.encode(
                    RequestAdu {
                        hdr: Header {
                            transaction_id: transaction_id.unwrap_or_default(),
                            unit_id: unit,
                        },
                        pdu: RequestPdu(request.clone()),
                    },
                    &mut buf,
                )?;
            }
        }
        Ok(buf.freeze())
    }

    fn feed(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
        match self {
            #[cfg(feature = "rtu")]
            Self::Rtu(codec) => Ok(codec
                .decode(buf)?
                .map(|adu| (adu.hdr.slave_id, None, adu.pdu))),
            #[cfg(feature = "ascii")]
            Self::Ascii(codec) => Ok(codec
                .decode(buf)?
                .map(|adu| (adu.hdr.slave_id, None, adu.pdu))),
            #[cfg(feature = "tcp")]
            Self::Tcp(codec) => Ok(codec
                .decode(buf)?
                .map(|adu| (adu.hdr.unit_id, Some(adu.hdr.transaction_id), adu.pdu))),
        }
    }

    /// Flush a pending partial frame after the idle gap elapsed.
    /// Only meaningful for RTU.
    fn flush_pending(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
        match self {
            #[cfg(feature = "rtu")]
            Self::Rtu(codec) => Ok(codec
                .flush_pending(buf)?
                .map(|adu| (adu.hdr.slave_id, None, adu.pdu))),
            #[allow(unreachable_patterns)]
            _ => Ok(None),
        }
    }
}

pub(crate) struct Engine {
    conn: Box<dyn Connection>,
    conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    conn_gone: bool,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: broadcast::Sender<MasterEvent>,
    unit_default: SlaveId,
    timeout_default: Duration,
    retries_default: u8,
    framer: Framer,
    max_in_flight: usize,
    idle_gap: Option<Duration>,
    buf: BytesMut,
    queue: VecDeque<Transaction>,
    in_flight: VecDeque<InFlight>,
    next_transaction_id: u16,
    idle_deadline: Option<Instant>,
}

impl Engine {
    pub(crate) fn new(
        conn: Box<dyn Connection>,
        conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        event_tx: broadcast::Sender<MasterEvent>,
        config: Config,
    ) -> Self {
        let (framer, max_in_flight, idle_gap) = match config.framing {
            #[cfg(feature = "rtu")]
            Framing::Rtu { idle_gap } => (
                Framer::Rtu(codec::rtu::ClientCodec::default()),
                1,
                Some(idle_gap),
            ),
            #[cfg(feature = "ascii")]
            Framing::Ascii => (Framer::Ascii(codec::ascii::ClientCodec::default()), 1, None),
            #[cfg(feature = "tcp")]
            Framing::Tcp { max_in_flight } => (
                Framer::Tcp(codec::tcp::ClientCodec::default()),
                max_in_flight.max(1),
                None,
            ),
        };
        Self {
            conn,
            conn_rx,
            conn_gone: false,
            cmd_rx,
            event_tx,
            unit_default: config.unit,
            timeout_default: config.timeout,
            retries_default: config.retries,
            framer,
            max_in_flight,
            idle_gap,
            buf: BytesMut::new(),
            queue: VecDeque::new(),
            in_flight: VecDeque::new(),
            next_transaction_id: 0,
            idle_deadline: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            self.pump();
            let deadline = self.next_deadline();
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Execute { request, opts, done }) => {
                        self.enqueue(request, opts, done);
                    }
                    Some(Command::Destroy) | None => break,
                },
                ev = self.conn_rx.recv(), if !self.conn_gone => match ev {
                    Some(ConnectionEvent::Open) => {
                        log::debug!("Connection is open");
                        let _ = self.event_tx.send(MasterEvent::Open);
                    }
                    Some(ConnectionEvent::Data(data)) => self.on_data(data),
                    Some(ConnectionEvent::Error(err)) => {
                        log::warn!("Connection error: {err}");
                        let _ = self
                            .event_tx
                            .send(MasterEvent::Error(Arc::new(err.into())));
                    }
                    Some(ConnectionEvent::Closed) => self.on_closed(),
                    None => {
                        self.conn_gone = true;
                        self.on_closed();
                    }
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86400 * 365 * 30))),
                    if deadline.is_some() => self.on_deadline(),
            }
        }
        self.shutdown();
    }

    fn enqueue(
        &mut self,
        request: Request,
        opts: ExecuteOptions,
        done: oneshot::Sender<Result<Response, Error>>,
    ) {
        if !self.conn.is_open() {
            let _ = done.send(Err(Error::ConnectionClosed));
            return;
        }
        log::debug!("Submitting request: {request}");
        self.queue.push_back(Transaction {
            unit: opts.unit.unwrap_or(self.unit_default),
            timeout: opts.timeout.unwrap_or(self.timeout_default),
            retries_left: opts.retries.unwrap_or(self.retries_default),
            request,
            done,
        });
    }

    /// Move queued transactions in flight while capacity allows.
    fn pump(&mut self) {
        if !self.conn.is_open() {
            return;
        }
        while self.in_flight.len() < self.max_in_flight {
            let Some(txn) = self.queue.pop_front() else {
                break;
            };
            if txn.done.is_closed() {
                log::debug!("Dropping cancelled request: {}", txn.request);
                continue;
            }
            self.dispatch(txn);
        }
    }

    fn dispatch(&mut self, txn: Transaction) {
        #[cfg(feature = "tcp")]
        let transaction_id =
            matches!(self.framer, Framer::Tcp(_)).then(|| self.fresh_transaction_id());
        #[cfg(not(feature = "tcp"))]
        let transaction_id = None;
        let frame = match self.framer.wrap(&txn.request, txn.unit, transaction_id) {
            Ok(frame) => frame,
            Err(err) => {
                let _ = txn.done.send(Err(err));
                return;
            }
        };
        log::debug!(
            "Writing request to unit {}: {}",
            txn.unit,
            txn.request
        );
        self.conn.write(frame);
        self.in_flight.push_back(InFlight {
            transaction_id,
            deadline: Instant::now() + txn.timeout,
            txn,
        });
    }

    /// A fresh transaction id: monotonically increasing, wrapping,
    /// skipping ids still in flight.
    fn fresh_transaction_id(&mut self) -> u16 {
        loop {
            let id = self.next_transaction_id;
            self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
            if !self
                .in_flight
                .iter()
                .any(|f| f.transaction_id == Some(id))
            {
                return id;
            }
        }
    }

    fn on_data(&mut self, data: Bytes) {
        self.buf.extend_from_slice(&data);
        loop {
            match self.framer.feed(&mut self.buf) {
                Ok(Some((unit_id, transaction_id, pdu))) => {
                    self.on_frame(unit_id, transaction_id, pdu);
                }
                Ok(None) => break,
                Err(err) => {
                    self.buf.clear();
                    self.on_frame_error(err);
                    break;
                }
            }
        }
        // Arm the silence timer while a partial frame is pending.
        self.idle_deadline = match self.idle_gap {
            Some(gap) if !self.buf.is_empty() => Some(Instant::now() + gap),
            _ => None,
        };
    }

    fn on_frame(&mut self, unit_id: SlaveId, transaction_id: Option<u16>, pdu: Bytes) {
        let in_flight = match transaction_id {
            Some(tid) => {
                let Some(pos) = self
                    .in_flight
                    .iter()
                    .position(|f| f.transaction_id == Some(tid))
                else {
                    log::warn!("Dropping response with unknown transaction id {tid}");
                    return;
                };
                if self.in_flight[pos].txn.unit != unit_id {
                    log::warn!(
                        "Dropping response from unit {unit_id} for transaction {tid} of unit {}",
                        self.in_flight[pos].txn.unit
                    );
                    return;
                }
                self.in_flight.remove(pos).expect("position is valid")
            }
            None => {
                // Serial responses correlate by arrival order; any
                // unit id is accepted.
                let Some(in_flight) = self.in_flight.pop_front() else {
                    log::warn!("Dropping unexpected frame from unit {unit_id}");
                    return;
                };
                in_flight
            }
        };
        match codec::decode_response(&in_flight.txn.request, pdu) {
            Ok(response) => {
                log::debug!("Completed request: {response}");
                // Fails if the caller cancelled; the response is
                // discarded then.
                let _ = in_flight.txn.done.send(Ok(response));
            }
            Err(err) => self.fail_or_retry(in_flight.txn, err),
        }
    }

    /// A frame-shaped error on a serial transport belongs to the
    /// oldest in-flight transaction. On TCP nothing can be
    /// attributed, so it only surfaces as an engine event and the
    /// affected transaction times out.
    fn on_frame_error(&mut self, err: Error) {
        log::warn!("Frame error: {err}");
        #[cfg(feature = "tcp")]
        let correlated = matches!(self.framer, Framer::Tcp(_));
        #[cfg(not(feature = "tcp"))]
        let correlated = false;
        if correlated {
            let _ = self.event_tx.send(MasterEvent::Error(Arc::new(err)));
            return;
        }
        match self.in_flight.pop_front() {
            Some(in_flight) => self.fail_or_retry(in_flight.txn, err),
            None => {
                let _ = self.event_tx.send(MasterEvent::Error(Arc::new(err)));
            }
        }
    }

    fn fail_or_retry(&mut self, mut txn: Transaction, err: Error) {
        if err.is_retryable() && txn.retries_left > 0 {
            txn.retries_left -= 1;
            log::warn!(
                "Retrying request after error ({} retries left): {err}",
                txn.retries_left
            );
            // Retries go to the head so a misbehaving request cannot
            // leapfrog the submission order it already held.
            self.queue.push_front(txn);
        } else {
            let _ = txn.done.send(Err(err));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight
            .iter()
            .map(|f| f.deadline)
            .chain(self.idle_deadline)
            .min()
    }

    fn on_deadline(&mut self) {
        let now = Instant::now();
        if self.idle_deadline.is_some_and(|idle| idle <= now) {
            self.idle_deadline = None;
            match self.framer.flush_pending(&mut self.buf) {
                Ok(Some((unit_id, transaction_id, pdu))) => {
                    self.on_frame(unit_id, transaction_id, pdu);
                }
                Ok(None) => {}
                Err(err) => self.on_frame_error(err),
            }
        }
        while let Some(pos) = self.in_flight.iter().position(|f| f.deadline <= now) {
            let in_flight = self.in_flight.remove(pos).expect("position is valid");
            log::warn!("Request timed out: {}", in_flight.txn.request);
            self.fail_or_retry(in_flight.txn, Error::ResponseTimeout);
        }
    }

    /// Drain every queued and in-flight transaction with a failure.
    fn drain(&mut self) {
        for in_flight in self.in_flight.drain(..) {
            let _ = in_flight.txn.done.send(Err(Error::ConnectionClosed));
        }
        for txn in self.queue.drain(..) {
            let _ = txn.done.send(Err(Error::ConnectionClosed));
        }
    }

    fn on_closed(&mut self) {
        log::debug!("Connection closed");
        self.buf.clear();
        self.idle_deadline = None;
        self.drain();
        let _ = self.event_tx.send(MasterEvent::Close);
    }

    fn shutdown(&mut self) {
        self.drain();
        self.conn.destroy();
        let _ = self.event_tx.send(MasterEvent::Close);
    }
}
