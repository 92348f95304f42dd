// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A scripted in-memory connection for driving the master engine.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use bytes::Bytes;
use modbus_master::connection::{Connection, ConnectionEvent};
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct MockConnection {
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    destroyed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    written: Mutex<Vec<Bytes>>,
    open: AtomicBool,
    closes: AtomicUsize,
}

/// Test-side handle: observe written frames, inject events.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

pub fn mock_connection() -> (MockConnection, MockHandle) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        open: AtomicBool::new(true),
        ..Shared::default()
    });
    let _ = event_tx.send(ConnectionEvent::Open);
    let conn = MockConnection {
        shared: Arc::clone(&shared),
        event_tx: event_tx.clone(),
        events: Some(event_rx),
        destroyed: false,
    };
    let handle = MockHandle { shared, event_tx };
    (conn, handle)
}

impl Connection for MockConnection {
    fn write(&mut self, bytes: Bytes) {
        self.shared.written.lock().unwrap().push(bytes);
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events.take()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        let _ = self.event_tx.send(ConnectionEvent::Closed);
    }
}

impl MockHandle {
    pub fn inject(&self, bytes: &[u8]) {
        let _ = self
            .event_tx
            .send(ConnectionEvent::Data(Bytes::copy_from_slice(bytes)));
    }

    pub fn close(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(ConnectionEvent::Closed);
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.shared.written.lock().unwrap().clone()
    }

    pub fn written_count(&self) -> usize {
        self.shared.written.lock().unwrap().len()
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Let the engine task run (and paused-clock timers fire) until
    /// `count` frames have been written.
    pub async fn wait_written(&self, count: usize) {
        for _ in 0..1_000 {
            if self.written_count() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        panic!(
            "engine never wrote frame #{count} (got {})",
            self.written_count()
        );
    }
}

/// CRC-16 with the Modbus polynomial, low byte first on the wire.
pub fn crc16(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if odd {
                crc ^= 0xA001;
            }
        }
    }
    [(crc & 0xFF) as u8, (crc >> 8) as u8]
}

/// An RTU frame: address + PDU + CRC.
pub fn rtu_frame(slave_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(slave_id);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc);
    frame
}

/// The two's complement of the 8 bit sum.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, x| acc.wrapping_add(*x))
        .wrapping_neg()
}

/// An ASCII frame: ':' + uppercase hex of (address + PDU + LRC) + CR LF.
pub fn ascii_frame(slave_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(pdu.len() + 2);
    raw.push(slave_id);
    raw.extend_from_slice(pdu);
    raw.push(lrc(&raw));
    let mut frame = Vec::with_capacity(1 + raw.len() * 2 + 2);
    frame.push(b':');
    for byte in &raw {
        frame.extend_from_slice(format!("{byte:02X}").as_bytes());
    }
    frame.extend_from_slice(b"\r\n");
    frame
}

/// An MBAP frame: transaction id + protocol id 0 + length + unit id + PDU.
pub fn mbap_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 7);
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}
