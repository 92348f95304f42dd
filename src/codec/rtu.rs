// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::Error,
    frame::rtu::{Header, RequestAdu, ResponseAdu},
};

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
const MAX_FRAME_LEN: usize = 256;

const CRC_BYTE_COUNT: usize = 2;

// Smallest complete frame: address, one PDU byte, CRC.
const MIN_FRAME_LEN: usize = 4;

/// Calculate the CRC (Cyclic Redundancy Check) sum.
///
/// Byte-wise LSB-first with the Modbus polynomial 0xA001 and seed
/// 0xFFFF; the result is pre-swapped so that a big-endian write puts
/// the low byte first on the wire.
pub(crate) fn calc_crc(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let crc_odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if crc_odd {
                crc ^= 0xA001;
            }
        }
    }
    crc << 8 | crc >> 8
}

fn check_crc(adu_data: &[u8], expected_crc: u16) -> Result<(), Error> {
    let actual_crc = calc_crc(adu_data);
    if expected_crc != actual_crc {
        return Err(Error::InvalidChecksum {
            expected: expected_crc,
            actual: actual_crc,
        });
    }
    Ok(())
}

/// Expected PDU length of the pending response, derived from the
/// function code byte. This is the known-length hint that
/// short-circuits the silence timer for well-formed traffic.
fn get_response_pdu_len(adu_buf: &BytesMut) -> Result<Option<usize>, Error> {
    let Some(fn_code) = adu_buf.get(1) else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x04 => {
            return Ok(adu_buf
                .get(2)
                .map(|&byte_count| 2 + usize::from(byte_count)));
        }
        0x05 | 0x06 | 0x0F | 0x10 => 5,
        0x80..=0xFF => 2,
        _ => {
            return Err(Error::InvalidResponseData("invalid function code"));
        }
    };
    Ok(Some(len))
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

impl ClientCodec {
    /// Treat whatever has accumulated as a candidate frame.
    ///
    /// Called by the engine when the inter-byte idle gap elapses with
    /// a partial frame pending. The buffer is consumed either way.
    pub(crate) fn flush_pending(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        if buf.is_empty() {
            return Ok(None);
        }
        let frame = buf.split().freeze();
        if frame.len() < MIN_FRAME_LEN {
            return Err(Error::IncompleteResponseFrame);
        }
        let adu = &frame[..frame.len() - CRC_BYTE_COUNT];
        let crc = BigEndian::read_u16(&frame[frame.len() - CRC_BYTE_COUNT..]);
        check_crc(adu, crc)?;
        let slave_id = frame[0];
        let pdu = frame.slice(1..frame.len() - CRC_BYTE_COUNT);
        Ok(Some(ResponseAdu {
            hdr: Header { slave_id },
            pdu,
        }))
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some(pdu_len) = get_response_pdu_len(buf)? else {
            return Ok(None);
        };
        let adu_len = 1 + pdu_len;
        if adu_len + CRC_BYTE_COUNT > MAX_FRAME_LEN {
            return Err(Error::InvalidResponseData("frame exceeds maximum length"));
        }
        if buf.len() < adu_len + CRC_BYTE_COUNT {
            // Incomplete frame
            return Ok(None);
        }
        let adu_buf = buf.split_to(adu_len).freeze();
        let crc_buf = buf.split_to(CRC_BYTE_COUNT);
        check_crc(&adu_buf, BigEndian::read_u16(&crc_buf))?;
        let slave_id = adu_buf[0];
        let pdu = adu_buf.slice(1..);
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
        buf.reserve(pdu_data.len() + 3);
        buf.put_u8(hdr.slave_id);
        buf.put_slice(&pdu_data);
        let crc = calc_crc(buf);
        buf.put_u16(crc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Request, RequestPdu, Response, ResponsePdu};

    fn wrap(request: Request, slave_id: u8) -> BytesMut {
        let mut buf = BytesMut::new();
        let adu = RequestAdu {
            hdr: Header { slave_id },
            pdu: RequestPdu(request),
        };
        ClientCodec::default().encode(adu, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_calc_crc() {
        let msg = [0x01, 0x03, 0x08, 0x2B, 0x00, 0x02];
        assert_eq!(calc_crc(&msg), 0xB663);

        let msg = [0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00];
        assert_eq!(calc_crc(&msg), 0xFBF9);
    }

    #[test]
    fn test_get_response_pdu_len() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x66, 0x00, 99, 0x00]);
        assert!(get_response_pdu_len(&buf).is_err());

        buf[1] = 0x01;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(101));

        buf[1] = 0x02;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(101));

        buf[1] = 0x03;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(101));

        buf[1] = 0x04;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(101));

        buf[1] = 0x05;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(5));

        buf[1] = 0x06;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(5));

        buf[1] = 0x0F;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(5));

        buf[1] = 0x10;
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(5));

        for i in 0x81..=0x90 {
            buf[1] = i;
            assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(2));
        }
    }

    #[test]
    fn decode_empty_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn decode_single_byte_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0x01][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x12, // slave address
                0x02, // function code
                0x03, // byte count
                0x00, // data
                0x00, // data
                0x00, // data
                0x00, // CRC first byte
                      // missing CRC second byte
            ][..],
        );
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn decode_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x01, // slave address
                0x03, // function code
                0x04, // byte count
                0x89, //
                0x02, //
                0x42, //
                0xC7, //
                0x00, // crc
                0x9D, // crc
                0x00,
            ][..],
        );
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(hdr.slave_id, 0x01);
        let ResponsePdu(res) = ResponsePdu::try_from(pdu).unwrap();
        assert_eq!(
            res.unwrap(),
            Response::ReadHoldingRegisters(vec![0x8902, 0x42C7])
        );
    }

    #[test]
    fn decode_message_byte_by_byte() {
        // Feeding any partitioning of the frame must produce exactly
        // the same single frame.
        let frame = wrap(Request::WriteSingleCoil(0x1234, true), 0x0A);
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in &frame[..] {
            buf.put_u8(*byte);
            if let Some(adu) = codec.decode(&mut buf).unwrap() {
                decoded.push(adu);
            }
        }
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].hdr.slave_id, 0x0A);
        assert_eq!(&decoded[0].pdu[..], &[0x05, 0x12, 0x34, 0xFF, 0x00]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_exception_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x66, //
                0x82, // exception = 0x80 + 0x02
                0x03, //
                0xB1, // crc
                0x7E, // crc
            ][..],
        );
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.slave_id, 0x66);
        let ResponsePdu(res) = ResponsePdu::try_from(pdu).unwrap();
        let err = res.unwrap_err();
        assert_eq!(format!("{err}"), "Modbus function 2: Illegal data value");
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn decode_with_invalid_crc() {
        // Flipping any byte but the trailing CRC fires
        // InvalidChecksum.
        let frame = wrap(Request::WriteSingleCoil(0x1234, true), 0x0A);
        for i in 0..frame.len() - CRC_BYTE_COUNT {
            let mut corrupt = BytesMut::from(&frame[..]);
            corrupt[i] ^= 0x40;
            if i == 1 {
                // A flipped function code derails the length detection
                // instead of the checksum.
                continue;
            }
            let mut codec = ClientCodec::default();
            let res = codec.decode(&mut corrupt);
            assert!(
                matches!(res, Err(Error::InvalidChecksum { .. })),
                "byte {i} should fail the CRC check"
            );
        }
    }

    #[test]
    fn encode_read_request() {
        let buf = wrap(Request::WriteSingleCoil(0x1234, true), 0x0A);
        assert_eq!(&buf[..6], &[0x0A, 0x05, 0x12, 0x34, 0xFF, 0x00]);
        let crc = calc_crc(&buf[..6]);
        assert_eq!(buf[6], (crc >> 8) as u8);
        assert_eq!(buf[7], (crc & 0xFF) as u8);

        let buf = wrap(Request::ReadHoldingRegisters(0x082B, 2), 0x01);
        assert_eq!(
            &buf[..],
            &[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02, 0xB6, 0x63]
        );
    }

    #[test]
    fn flush_pending_empty_buffer() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        assert!(codec.flush_pending(&mut buf).unwrap().is_none());
    }

    #[test]
    fn flush_pending_short_buffer() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0x0A, 0x81, 0x02][..]);
        let res = codec.flush_pending(&mut buf);
        assert!(matches!(res, Err(Error::IncompleteResponseFrame)));
        assert!(buf.is_empty());
    }

    #[test]
    fn flush_pending_verifies_crc() {
        let frame = wrap(Request::WriteSingleCoil(0x1234, true), 0x0A);

        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&frame[..]);
        let adu = codec.flush_pending(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.slave_id, 0x0A);
        assert_eq!(&adu.pdu[..], &[0x05, 0x12, 0x34, 0xFF, 0x00]);
        assert!(buf.is_empty());

        let mut corrupt = BytesMut::from(&frame[..]);
        corrupt[3] ^= 0xFF;
        let res = codec.flush_pending(&mut corrupt);
        assert!(matches!(res, Err(Error::InvalidChecksum { .. })));
        assert!(corrupt.is_empty());
    }
}
