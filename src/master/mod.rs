// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transaction & retry engine
//!
//! A [`Master`] owns one [`Connection`](crate::connection::Connection)
//! and serializes all requests against it: submissions join a FIFO
//! queue, go in flight when the transport has capacity, and complete
//! when the matching response arrives or the timeout/retry budget is
//! exhausted. All bookkeeping lives in a single spawned task; the
//! handle communicates with it through channels only.

mod engine;

use std::{sync::Arc, time::Duration};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    connection::{Connection, ConnectionEvent},
    error::Error,
    frame::{Request, Response},
    slave::{Slave, SlaveId},
};

use self::engine::Engine;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default per-request retry budget.
pub const DEFAULT_RETRIES: u8 = 3;

/// Default RTU inter-byte idle gap when the baud rate is unknown.
///
/// The Modbus line specification demands at least 3.5 character
/// times; configure the gap accordingly when the baud rate is known.
pub const DEFAULT_IDLE_GAP: Duration = Duration::from_millis(10);

/// Default number of concurrent in-flight transactions on TCP.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// The framing variant spoken on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Binary framing with CRC-16 and idle-gap frame boundaries.
    #[cfg(feature = "rtu")]
    Rtu {
        /// Inter-byte silence that terminates a partial frame.
        idle_gap: Duration,
    },
    /// Printable hex framing delimited by `:` and CR LF, with LRC.
    #[cfg(feature = "ascii")]
    Ascii,
    /// MBAP framing with transaction-id correlation, no checksum.
    #[cfg(feature = "tcp")]
    Tcp {
        /// How many transactions may be in flight concurrently.
        max_in_flight: usize,
    },
}

/// Master configuration: the framing variant plus the defaults
/// applied to every request that does not override them.
#[derive(Debug, Clone)]
pub struct Config {
    pub framing: Framing,
    /// Default unit (slave) id.
    pub unit: SlaveId,
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Default per-request retry budget.
    pub retries: u8,
}

impl Config {
    fn new(framing: Framing) -> Self {
        Self {
            framing,
            unit: Slave::tcp_device().into(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }

    /// RTU framing with the default idle gap.
    #[cfg(feature = "rtu")]
    #[must_use]
    pub fn rtu() -> Self {
        Self::new(Framing::Rtu {
            idle_gap: DEFAULT_IDLE_GAP,
        })
    }

    /// ASCII framing.
    #[cfg(feature = "ascii")]
    #[must_use]
    pub fn ascii() -> Self {
        Self::new(Framing::Ascii)
    }

    /// TCP (MBAP) framing with the default in-flight capacity.
    #[cfg(feature = "tcp")]
    #[must_use]
    pub fn tcp() -> Self {
        Self::new(Framing::Tcp {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        })
    }
}

/// Per-request overrides of the master defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub unit: Option<SlaveId>,
    pub timeout: Option<Duration>,
    pub retries: Option<u8>,
}

/// Engine-level events.
#[derive(Debug, Clone)]
pub enum MasterEvent {
    /// The connection reported readiness.
    Open,
    /// The connection closed; all pending transactions failed.
    Close,
    /// A connection-level fault not attributable to one transaction.
    Error(Arc<Error>),
}

#[derive(Debug)]
pub(crate) enum Command {
    Execute {
        request: Request,
        opts: ExecuteOptions,
        done: oneshot::Sender<Result<Response, Error>>,
    },
    Destroy,
}

/// A Modbus master attached to one connection.
#[derive(Debug)]
pub struct Master {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<MasterEvent>,
    destroyed: bool,
}

impl Master {
    /// Attach a master to a connection and spawn its engine task.
    ///
    /// Must be called within a tokio runtime.
    pub fn open<C>(mut connection: C, config: Config) -> Self
    where
        C: Connection + 'static,
    {
        let conn_rx = connection.take_events().unwrap_or_else(|| {
            // The connection was attached elsewhere before; treat it
            // as closed so every submission fails fast.
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(ConnectionEvent::Closed);
            rx
        });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(16);
        let engine = Engine::new(
            Box::new(connection),
            conn_rx,
            cmd_rx,
            event_tx.clone(),
            config,
        );
        tokio::spawn(engine.run());
        Self {
            cmd_tx,
            event_tx,
            destroyed: false,
        }
    }

    /// Submit a request and wait for its outcome.
    ///
    /// Validation failures surface immediately without entering the
    /// queue. Dropping the returned future cancels the transaction:
    /// before it goes in flight it leaves the queue, afterwards its
    /// eventual response is parsed but discarded.
    pub async fn execute(
        &self,
        request: Request,
        opts: ExecuteOptions,
    ) -> Result<Response, Error> {
        request.validate()?;
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Execute {
                request,
                opts,
                done,
            })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Subscribe to engine-level events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MasterEvent> {
        self.event_tx.subscribe()
    }

    /// Shut the engine down, failing all pending transactions and
    /// destroying the connection. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let _ = self.cmd_tx.send(Command::Destroy);
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.destroy();
    }
}
