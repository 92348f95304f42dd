// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::Error,
    frame::ascii::{Header, RequestAdu, ResponseAdu},
};

const FRAME_START: u8 = b':';

const FRAME_END: &[u8] = b"\r\n";

// ':' + 2 hex chars per byte of (address + max PDU + LRC) + CR LF
const MAX_FRAME_LEN: usize = 1 + (1 + crate::frame::MAX_PDU_LEN + 1) * 2 + 2;

/// Longitudinal Redundancy Check: the two's complement of the 8 bit
/// sum of all preceding ADU bytes.
pub(crate) fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, x| acc.wrapping_add(*x))
        .wrapping_neg()
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        // Everything before the start-of-frame colon is line noise.
        match buf.iter().position(|&b| b == FRAME_START) {
            Some(0) => (),
            Some(n) => {
                log::debug!("Discarded {n} byte(s) before start of frame");
                buf.advance(n);
            }
            None => {
                if !buf.is_empty() {
                    log::debug!("Discarded {} byte(s) of line noise", buf.len());
                    buf.clear();
                }
                return Ok(None);
            }
        }
        let Some(end) = buf.windows(FRAME_END.len()).position(|w| w == FRAME_END) else {
            if buf.len() > MAX_FRAME_LEN {
                buf.clear();
                return Err(Error::InvalidResponseData("frame exceeds maximum length"));
            }
            return Ok(None);
        };
        let frame = buf.split_to(end + FRAME_END.len());
        let payload = &frame[1..end];
        if payload.len() % 2 != 0 {
            return Err(Error::InvalidResponseData("odd number of hex characters"));
        }
        let raw = hex::decode(payload)
            .map_err(|_| Error::InvalidResponseData("non-hex character in frame"))?;
        // address + at least one PDU byte + LRC
        if raw.len() < 3 {
            return Err(Error::IncompleteResponseFrame);
        }
        let (body, tail) = raw.split_at(raw.len() - 1);
        let expected = tail[0];
        let actual = lrc(body);
        if expected != actual {
            return Err(Error::InvalidChecksum {
                expected: expected.into(),
                actual: actual.into(),
            });
        }
        let slave_id = body[0];
        let pdu = Bytes::copy_from_slice(&body[1..]);
        Ok(Some(ResponseAdu {
            hdr: Header { slave_id },
            pdu,
        }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = (&pdu).into();
        let mut raw = Vec::with_capacity(pdu_data.len() + 2);
        raw.push(hdr.slave_id);
        raw.extend_from_slice(&pdu_data);
        let checksum = lrc(&raw);
        raw.push(checksum);
        buf.reserve(1 + raw.len() * 2 + FRAME_END.len());
        buf.put_u8(FRAME_START);
        buf.put_slice(hex::encode_upper(&raw).as_bytes());
        buf.put_slice(FRAME_END);
        Ok(())
    }
}
