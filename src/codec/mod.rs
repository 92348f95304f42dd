// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::Error,
    frame::{
        Coil, ExceptionResponse, Quantity, Request, RequestPdu, Response, ResponsePdu,
    },
};

/// Coil state is emitted strictly: `0xFF00` for ON, `0x0000` for OFF.
const fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

/// Coil state is accepted liberally: only `0xFF00` reads as ON,
/// every other word reads as OFF.
const fn coil_from_word(word: u16) -> bool {
    word == 0xFF00
}

const fn packed_bits_len(bitcount: usize) -> usize {
    (bitcount + 7) / 8
}

/// Pack an ordered sequence of bits little-endian: bit 0 of byte 0 is
/// element 0, the final byte is padded with zeros.
fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    let packed_size = packed_bits_len(coils.len());
    let mut res = vec![0; packed_size];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b);
        res[i / 8] |= v << (i % 8);
    }
    res
}

fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0..count {
        res.push((bytes[usize::from(i / 8)] >> (i % 8)) & 0b1 > 0);
    }
    res
}

/// The buffer must hold exactly `len` bytes: fewer means a truncated
/// frame, more means trailing garbage in a checksummed frame.
fn require_len(bytes: &[u8], len: usize) -> Result<(), Error> {
    match bytes.len().cmp(&len) {
        Ordering::Less => Err(Error::IncompleteResponseFrame),
        Ordering::Equal => Ok(()),
        Ordering::Greater => Err(Error::InvalidResponseData("unexpected trailing bytes")),
    }
}

fn require_min(bytes: &[u8], len: usize) -> Result<(), Error> {
    if bytes.len() < len {
        return Err(Error::IncompleteResponseFrame);
    }
    Ok(())
}

impl From<&Request> for Bytes {
    fn from(req: &Request) -> Bytes {
        let cnt = request_byte_count(req);
        let mut data = BytesMut::with_capacity(cnt);
        data.put_u8(req.function_code());
        match req {
            Request::ReadCoils(address, quantity)
            | Request::ReadDiscreteInputs(address, quantity)
            | Request::ReadHoldingRegisters(address, quantity)
            | Request::ReadInputRegisters(address, quantity) => {
                data.put_u16(*address);
                data.put_u16(*quantity);
            }
            Request::WriteSingleCoil(address, state) => {
                data.put_u16(*address);
                data.put_u16(bool_to_coil(*state));
            }
            Request::WriteSingleRegister(address, word) => {
                data.put_u16(*address);
                data.put_u16(*word);
            }
            Request::WriteMultipleCoils(address, coils) => {
                data.put_u16(*address);
                data.put_u16(coils.len() as u16);
                let packed_coils = pack_coils(coils);
                data.put_u8(packed_coils.len() as u8);
                data.put_slice(&packed_coils);
            }
            Request::WriteMultipleRegisters(address, words) => {
                data.put_u16(*address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(*w);
                }
            }
        }
        data.freeze()
    }
}

impl From<&RequestPdu> for Bytes {
    fn from(pdu: &RequestPdu) -> Bytes {
        (&pdu.0).into()
    }
}

impl From<&Response> for Bytes {
    fn from(rsp: &Response) -> Bytes {
        let cnt = response_byte_count(rsp);
        let mut data = BytesMut::with_capacity(cnt);
        data.put_u8(rsp.function_code());
        match rsp {
            Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
                let packed_coils = pack_coils(coils);
                data.put_u8(packed_coils.len() as u8);
                data.put_slice(&packed_coils);
            }
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(*w);
                }
            }
            Response::WriteSingleCoil(address, state) => {
                data.put_u16(*address);
                data.put_u16(bool_to_coil(*state));
            }
            Response::WriteSingleRegister(address, word) => {
                data.put_u16(*address);
                data.put_u16(*word);
            }
            Response::WriteMultipleCoils(address, quantity)
            | Response::WriteMultipleRegisters(address, quantity) => {
                data.put_u16(*address);
                data.put_u16(*quantity);
            }
        }
        data.freeze()
    }
}

impl From<&ExceptionResponse> for Bytes {
    fn from(ex: &ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        debug_assert!(ex.function < 0x80);
        data.put_u8(ex.function | 0x80);
        data.put_u8(ex.exception.code());
        data.freeze()
    }
}

fn request_byte_count(req: &Request) -> usize {
    match req {
        Request::ReadCoils(_, _)
        | Request::ReadDiscreteInputs(_, _)
        | Request::ReadHoldingRegisters(_, _)
        | Request::ReadInputRegisters(_, _)
        | Request::WriteSingleCoil(_, _)
        | Request::WriteSingleRegister(_, _) => 5,
        Request::WriteMultipleCoils(_, coils) => 6 + packed_bits_len(coils.len()),
        Request::WriteMultipleRegisters(_, words) => 6 + words.len() * 2,
    }
}

fn response_byte_count(rsp: &Response) -> usize {
    match rsp {
        Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
            2 + packed_bits_len(coils.len())
        }
        Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
            2 + words.len() * 2
        }
        Response::WriteSingleCoil(_, _)
        | Response::WriteSingleRegister(_, _)
        | Response::WriteMultipleCoils(_, _)
        | Response::WriteMultipleRegisters(_, _) => 5,
    }
}

impl TryFrom<Bytes> for Request {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.is_empty() {
            return Err(Error::IncompleteResponseFrame);
        }
        let fn_code = bytes[0];
        let req = match fn_code {
            0x01..=0x04 => {
                require_len(&bytes, 5)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                match fn_code {
                    0x01 => Request::ReadCoils(address, quantity),
                    0x02 => Request::ReadDiscreteInputs(address, quantity),
                    0x03 => Request::ReadHoldingRegisters(address, quantity),
                    _ => Request::ReadInputRegisters(address, quantity),
                }
            }
            0x05 => {
                require_len(&bytes, 5)?;
                Request::WriteSingleCoil(
                    BigEndian::read_u16(&bytes[1..3]),
                    coil_from_word(BigEndian::read_u16(&bytes[3..5])),
                )
            }
            0x06 => {
                require_len(&bytes, 5)?;
                Request::WriteSingleRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x0F => {
                require_min(&bytes, 6)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let byte_count = bytes[5];
                if usize::from(byte_count) != packed_bits_len(quantity.into()) {
                    return Err(Error::InvalidResponseData(
                        "byte count does not match quantity",
                    ));
                }
                require_len(&bytes, 6 + usize::from(byte_count))?;
                Request::WriteMultipleCoils(address, unpack_coils(&bytes[6..], quantity))
            }
            0x10 => {
                require_min(&bytes, 6)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let byte_count = bytes[5];
                if usize::from(byte_count) != usize::from(quantity) * 2 {
                    return Err(Error::InvalidResponseData(
                        "byte count does not match quantity",
                    ));
                }
                require_len(&bytes, 6 + usize::from(byte_count))?;
                let words = bytes[6..]
                    .chunks_exact(2)
                    .map(BigEndian::read_u16)
                    .collect();
                Request::WriteMultipleRegisters(address, words)
            }
            _ => {
                return Err(Error::InvalidResponseData("invalid function code"));
            }
        };
        Ok(req)
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.is_empty() {
            return Err(Error::IncompleteResponseFrame);
        }
        let fn_code = bytes[0];
        let rsp = match fn_code {
            0x01 | 0x02 => {
                require_min(&bytes, 2)?;
                let byte_count = bytes[1];
                if byte_count == 0 {
                    return Err(Error::InvalidResponseData("zero byte count"));
                }
                require_len(&bytes, 2 + usize::from(byte_count))?;
                // The requested quantity is unknown here, so the whole
                // final byte unpacks; the engine truncates after
                // correlation.
                let quantity = u16::from(byte_count) * 8;
                let coils = unpack_coils(&bytes[2..], quantity);
                match fn_code {
                    0x01 => Response::ReadCoils(coils),
                    _ => Response::ReadDiscreteInputs(coils),
                }
            }
            0x03 | 0x04 => {
                require_min(&bytes, 2)?;
                let byte_count = bytes[1];
                if byte_count == 0 || byte_count % 2 != 0 {
                    return Err(Error::InvalidResponseData("invalid byte count"));
                }
                require_len(&bytes, 2 + usize::from(byte_count))?;
                let words: Vec<u16> = bytes[2..]
                    .chunks_exact(2)
                    .map(BigEndian::read_u16)
                    .collect();
                match fn_code {
                    0x03 => Response::ReadHoldingRegisters(words),
                    _ => Response::ReadInputRegisters(words),
                }
            }
            0x05 => {
                require_len(&bytes, 5)?;
                Response::WriteSingleCoil(
                    BigEndian::read_u16(&bytes[1..3]),
                    coil_from_word(BigEndian::read_u16(&bytes[3..5])),
                )
            }
            0x06 => {
                require_len(&bytes, 5)?;
                Response::WriteSingleRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x0F | 0x10 => {
                require_len(&bytes, 5)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                match fn_code {
                    0x0F => Response::WriteMultipleCoils(address, quantity),
                    _ => Response::WriteMultipleRegisters(address, quantity),
                }
            }
            _ => {
                return Err(Error::InvalidResponseData("invalid function code"));
            }
        };
        Ok(rsp)
    }
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.is_empty() {
            return Err(Error::IncompleteResponseFrame);
        }
        let fn_err_code = bytes[0];
        if fn_err_code & 0x80 == 0 {
            return Err(Error::InvalidResponseData(
                "invalid exception function code",
            ));
        }
        require_len(&bytes, 2)?;
        Ok(ExceptionResponse {
            function: fn_err_code & 0x7F,
            exception: bytes[1].into(),
        })
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.is_empty() {
            return Err(Error::IncompleteResponseFrame);
        }
        let pdu = if bytes[0] & 0x80 == 0 {
            Response::try_from(bytes)?.into()
        } else {
            ExceptionResponse::try_from(bytes)?.into()
        };
        Ok(pdu)
    }
}

/// Decode a response PDU for a specific outstanding request.
///
/// Beyond the standalone decoding this enforces the function-code
/// match, routes exception frames, checks the byte count against the
/// requested quantity, and truncates bit payloads to the quantity
/// actually requested.
pub(crate) fn decode_response(request: &Request, bytes: Bytes) -> Result<Response, Error> {
    if bytes.is_empty() {
        return Err(Error::IncompleteResponseFrame);
    }
    let expected = request.function_code();
    let fn_code = bytes[0];
    if fn_code & 0x80 != 0 {
        let ex = ExceptionResponse::try_from(bytes)?;
        if ex.function != expected {
            return Err(Error::InvalidResponseData(
                "exception response for a different function",
            ));
        }
        return Err(Error::Exception(ex));
    }
    if fn_code != expected {
        return Err(Error::InvalidResponseData("function code mismatch"));
    }
    let rsp = Response::try_from(bytes)?;
    match (request, rsp) {
        (Request::ReadCoils(_, quantity), Response::ReadCoils(coils)) => {
            Ok(Response::ReadCoils(truncate_bits(coils, *quantity)?))
        }
        (Request::ReadDiscreteInputs(_, quantity), Response::ReadDiscreteInputs(inputs)) => Ok(
            Response::ReadDiscreteInputs(truncate_bits(inputs, *quantity)?),
        ),
        (Request::ReadHoldingRegisters(_, quantity), Response::ReadHoldingRegisters(words)) => {
            check_word_count(&words, *quantity)?;
            Ok(Response::ReadHoldingRegisters(words))
        }
        (Request::ReadInputRegisters(_, quantity), Response::ReadInputRegisters(words)) => {
            check_word_count(&words, *quantity)?;
            Ok(Response::ReadInputRegisters(words))
        }
        (Request::WriteSingleCoil(_, _), rsp @ Response::WriteSingleCoil(_, _)) => Ok(rsp),
        (Request::WriteSingleRegister(_, _), rsp @ Response::WriteSingleRegister(_, _)) => Ok(rsp),
        (Request::WriteMultipleCoils(_, coils), Response::WriteMultipleCoils(address, quantity)) => {
            if usize::from(quantity) != coils.len() {
                return Err(Error::InvalidResponseData(
                    "echoed quantity does not match request",
                ));
            }
            Ok(Response::WriteMultipleCoils(address, quantity))
        }
        (
            Request::WriteMultipleRegisters(_, words),
            Response::WriteMultipleRegisters(address, quantity),
        ) => {
            if usize::from(quantity) != words.len() {
                return Err(Error::InvalidResponseData(
                    "echoed quantity does not match request",
                ));
            }
            Ok(Response::WriteMultipleRegisters(address, quantity))
        }
        _ => Err(Error::InvalidResponseData("function code mismatch")),
    }
}

fn truncate_bits(mut bits: Vec<Coil>, quantity: Quantity) -> Result<Vec<Coil>, Error> {
    // The peer packs ⌈quantity/8⌉ bytes, so the unpacked length is
    // always a whole multiple of 8.
    if bits.len() != packed_bits_len(quantity.into()) * 8 {
        return Err(Error::InvalidResponseData(
            "byte count does not match requested quantity",
        ));
    }
    bits.truncate(quantity.into());
    Ok(bits)
}

fn check_word_count(words: &[u16], quantity: Quantity) -> Result<(), Error> {
    if words.len() != usize::from(quantity) {
        return Err(Error::InvalidResponseData(
            "byte count does not match requested quantity",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ExceptionCode;

    #[test]
    fn convert_bool_to_coil() {
        assert_eq!(bool_to_coil(true), 0xFF00);
        assert_eq!(bool_to_coil(false), 0x0000);
    }

    #[test]
    fn convert_word_to_bool() {
        // Strict emission, liberal acceptance.
        assert!(coil_from_word(0xFF00));
        assert!(!coil_from_word(0x0000));
        assert!(!coil_from_word(0x00FF));
        assert!(!coil_from_word(0xFFFF));
        assert!(!coil_from_word(0x0001));
    }

    #[test]
    fn convert_booleans_to_bytes() {
        assert_eq!(pack_coils(&[]), &[] as &[u8]);
        assert_eq!(pack_coils(&[true]), &[0b_1]);
        assert_eq!(pack_coils(&[false]), &[0b_0]);
        assert_eq!(pack_coils(&[true, false]), &[0b_01]);
        assert_eq!(pack_coils(&[false, true]), &[0b_10]);
        assert_eq!(pack_coils(&[true, true]), &[0b_11]);
        assert_eq!(pack_coils(&[true; 8]), &[0b_1111_1111]);
        assert_eq!(pack_coils(&[true; 9]), &[255, 1]);
        assert_eq!(pack_coils(&[false; 8]), &[0]);
        assert_eq!(pack_coils(&[false; 9]), &[0, 0]);
    }

    #[test]
    fn unpack_bits() {
        assert_eq!(unpack_coils(&[], 0), &[] as &[bool]);
        assert_eq!(unpack_coils(&[0, 0], 0), &[] as &[bool]);
        assert_eq!(unpack_coils(&[0b1], 1), &[true]);
        assert_eq!(unpack_coils(&[0b01], 2), &[true, false]);
        assert_eq!(unpack_coils(&[0b10], 2), &[false, true]);
        assert_eq!(unpack_coils(&[0b101], 3), &[true, false, true]);
        assert_eq!(unpack_coils(&[0xff, 0b11], 10), &[true; 10]);
    }

    #[test]
    fn exception_response_into_bytes() {
        let bytes: Bytes = (&ExceptionResponse {
            function: 0x03,
            exception: ExceptionCode::IllegalDataAddress,
        })
            .into();
        assert_eq!(bytes[0], 0x83);
        assert_eq!(bytes[1], 0x02);
    }

    #[test]
    fn exception_response_from_bytes() {
        assert!(ExceptionResponse::try_from(Bytes::from_static(&[0x79, 0x02])).is_err());

        let bytes = Bytes::from_static(&[0x83, 0x02]);
        let rsp = ExceptionResponse::try_from(bytes).unwrap();
        assert_eq!(
            rsp,
            ExceptionResponse {
                function: 0x03,
                exception: ExceptionCode::IllegalDataAddress,
            }
        );
    }

    #[test]
    fn exception_response_with_unknown_code() {
        let bytes = Bytes::from_static(&[0x81, 0x77]);
        let rsp = ExceptionResponse::try_from(bytes).unwrap();
        assert_eq!(rsp.function, 0x01);
        assert_eq!(rsp.exception, ExceptionCode::Unknown(0x77));
    }

    mod serialize_requests {
        use super::*;

        #[test]
        fn read_coils() {
            let bytes: Bytes = (&Request::ReadCoils(0x12, 4)).into();
            assert_eq!(&bytes[..], &[0x01, 0x00, 0x12, 0x00, 0x04]);
        }

        #[test]
        fn read_discrete_inputs() {
            let bytes: Bytes = (&Request::ReadDiscreteInputs(0x03, 19)).into();
            assert_eq!(&bytes[..], &[0x02, 0x00, 0x03, 0x00, 19]);
        }

        #[test]
        fn read_holding_registers() {
            let bytes: Bytes = (&Request::ReadHoldingRegisters(0x09, 77)).into();
            assert_eq!(&bytes[..], &[0x03, 0x00, 0x09, 0x00, 0x4D]);
        }

        #[test]
        fn read_input_registers() {
            let bytes: Bytes = (&Request::ReadInputRegisters(0x09, 77)).into();
            assert_eq!(&bytes[..], &[0x04, 0x00, 0x09, 0x00, 0x4D]);
        }

        #[test]
        fn write_single_coil() {
            let bytes: Bytes = (&Request::WriteSingleCoil(0x1234, true)).into();
            assert_eq!(&bytes[..], &[0x05, 0x12, 0x34, 0xFF, 0x00]);

            let bytes: Bytes = (&Request::WriteSingleCoil(0x1234, false)).into();
            assert_eq!(&bytes[..], &[0x05, 0x12, 0x34, 0x00, 0x00]);
        }

        #[test]
        fn write_single_register() {
            let bytes: Bytes = (&Request::WriteSingleRegister(0x07, 0xABCD)).into();
            assert_eq!(&bytes[..], &[0x06, 0x00, 0x07, 0xAB, 0xCD]);
        }

        #[test]
        fn write_multiple_coils() {
            let states = vec![true, false, true, true];
            let bytes: Bytes = (&Request::WriteMultipleCoils(0x3311, states)).into();
            assert_eq!(
                &bytes[..],
                &[0x0F, 0x33, 0x11, 0x00, 0x04, 0x01, 0b_0000_1101]
            );
        }

        #[test]
        fn write_multiple_registers() {
            let bytes: Bytes =
                (&Request::WriteMultipleRegisters(0x06, vec![0xABCD, 0xEF12])).into();
            assert_eq!(
                &bytes[..],
                &[0x10, 0x00, 0x06, 0x00, 0x02, 0x04, 0xAB, 0xCD, 0xEF, 0x12]
            );
        }
    }

    mod deserialize_requests {
        use super::*;

        #[test]
        fn empty_request() {
            assert!(matches!(
                Request::try_from(Bytes::new()),
                Err(Error::IncompleteResponseFrame)
            ));
        }

        #[test]
        fn read_coils() {
            assert!(matches!(
                Request::try_from(Bytes::from_static(&[0x01])),
                Err(Error::IncompleteResponseFrame)
            ));
            assert!(matches!(
                Request::try_from(Bytes::from_static(&[0x01, 0x00, 0x00, 0x22])),
                Err(Error::IncompleteResponseFrame)
            ));

            let bytes = Bytes::from_static(&[0x01, 0x00, 0x12, 0x00, 0x04]);
            let req = Request::try_from(bytes).unwrap();
            assert_eq!(req, Request::ReadCoils(0x12, 4));
        }

        #[test]
        fn write_single_coil() {
            let bytes = Bytes::from_static(&[0x05, 0x12, 0x34, 0xFF, 0x00]);
            let req = Request::try_from(bytes).unwrap();
            assert_eq!(req, Request::WriteSingleCoil(0x1234, true));

            // Liberal acceptance: anything but 0xFF00 is OFF.
            let bytes = Bytes::from_static(&[0x05, 0x12, 0x34, 0x12, 0x00]);
            let req = Request::try_from(bytes).unwrap();
            assert_eq!(req, Request::WriteSingleCoil(0x1234, false));
        }

        #[test]
        fn write_multiple_coils() {
            assert!(Request::try_from(Bytes::from_static(&[
                0x0F,
                0x33,
                0x11,
                0x00,
                0x04,
                0x02,
                0b_0000_1101,
            ]))
            .is_err());

            let bytes = Bytes::from_static(&[0x0F, 0x33, 0x11, 0x00, 0x04, 0x01, 0b_0000_1101]);
            let req = Request::try_from(bytes).unwrap();
            assert_eq!(
                req,
                Request::WriteMultipleCoils(0x3311, vec![true, false, true, true])
            );
        }

        #[test]
        fn write_multiple_registers() {
            assert!(Request::try_from(Bytes::from_static(&[
                0x10, 0x00, 0x06, 0x00, 0x02, 0x05, 0xAB, 0xCD, 0xEF, 0x12,
            ]))
            .is_err());

            let bytes =
                Bytes::from_static(&[0x10, 0x00, 0x06, 0x00, 0x02, 0x04, 0xAB, 0xCD, 0xEF, 0x12]);
            let req = Request::try_from(bytes).unwrap();
            assert_eq!(
                req,
                Request::WriteMultipleRegisters(0x06, vec![0xABCD, 0xEF12])
            );
        }

        #[test]
        fn invalid_function_code() {
            let bytes = Bytes::from_static(&[0x55, 0xCC, 0x88, 0xAA, 0xFF]);
            assert!(matches!(
                Request::try_from(bytes),
                Err(Error::InvalidResponseData(_))
            ));
        }

        #[test]
        fn round_trip_all_functions() {
            for req in [
                Request::ReadCoils(0x0013, 19),
                Request::ReadDiscreteInputs(0x00C4, 22),
                Request::ReadHoldingRegisters(0x006B, 3),
                Request::ReadInputRegisters(0x0008, 1),
                Request::WriteSingleCoil(0x00AC, true),
                Request::WriteSingleRegister(0x0001, 0x0003),
                Request::WriteMultipleCoils(0x0013, vec![true, false, true, true, false]),
                Request::WriteMultipleRegisters(0x0001, vec![0x000A, 0x0102]),
            ] {
                let bytes: Bytes = (&req).into();
                assert_eq!(Request::try_from(bytes).unwrap(), req);
            }
        }
    }

    mod serialize_responses {
        use super::*;

        #[test]
        fn read_coils() {
            let bytes: Bytes = (&Response::ReadCoils(vec![true, false, false, true, false])).into();
            assert_eq!(&bytes[..], &[0x01, 0x01, 0b_0000_1001]);
        }

        #[test]
        fn read_holding_registers() {
            let bytes: Bytes = (&Response::ReadHoldingRegisters(vec![0xAA00, 0x1111])).into();
            assert_eq!(&bytes[..], &[0x03, 0x04, 0xAA, 0x00, 0x11, 0x11]);
        }

        #[test]
        fn write_single_coil() {
            let bytes: Bytes = (&Response::WriteSingleCoil(0x1234, true)).into();
            assert_eq!(&bytes[..], &[0x05, 0x12, 0x34, 0xFF, 0x00]);
        }

        #[test]
        fn write_multiple_coils() {
            let bytes: Bytes = (&Response::WriteMultipleCoils(0x3311, 5)).into();
            assert_eq!(&bytes[..], &[0x0F, 0x33, 0x11, 0x00, 0x05]);
        }
    }

    mod deserialize_responses {
        use super::*;

        #[test]
        fn read_coils() {
            let bytes = Bytes::from_static(&[0x01, 0x01, 0b_0000_1001]);
            let rsp = Response::try_from(bytes).unwrap();
            assert_eq!(
                rsp,
                Response::ReadCoils(vec![true, false, false, true, false, false, false, false])
            );
        }

        #[test]
        fn read_holding_registers() {
            let bytes = Bytes::from_static(&[0x03, 0x04, 0xAA, 0x00, 0x11, 0x11]);
            let rsp = Response::try_from(bytes).unwrap();
            assert_eq!(rsp, Response::ReadHoldingRegisters(vec![0xAA00, 0x1111]));
        }

        #[test]
        fn read_holding_registers_with_odd_byte_count() {
            let bytes = Bytes::from_static(&[0x03, 0x03, 0xAA, 0x00, 0x11]);
            assert!(matches!(
                Response::try_from(bytes),
                Err(Error::InvalidResponseData(_))
            ));
        }

        #[test]
        fn write_single_coil_liberal_state() {
            let bytes = Bytes::from_static(&[0x05, 0x00, 0x33, 0xFF, 0x00]);
            let rsp = Response::try_from(bytes).unwrap();
            assert_eq!(rsp, Response::WriteSingleCoil(0x33, true));

            // Any word other than 0xFF00 decodes as OFF.
            let bytes = Bytes::from_static(&[0x05, 0x00, 0x33, 0xFF, 0x01]);
            let rsp = Response::try_from(bytes).unwrap();
            assert_eq!(rsp, Response::WriteSingleCoil(0x33, false));
        }

        #[test]
        fn round_trip_all_functions() {
            for rsp in [
                Response::ReadCoils(vec![true, false, true, true, false, false, true, false]),
                Response::ReadDiscreteInputs(vec![false; 8]),
                Response::ReadHoldingRegisters(vec![0x8902, 0x42C7]),
                Response::ReadInputRegisters(vec![0x0000, 0xFFFF]),
                Response::WriteSingleCoil(0x00AC, true),
                Response::WriteSingleRegister(0x0001, 0x0003),
                Response::WriteMultipleCoils(0x0013, 10),
                Response::WriteMultipleRegisters(0x0001, 2),
            ] {
                let bytes: Bytes = (&rsp).into();
                assert_eq!(Response::try_from(bytes).unwrap(), rsp);
            }
        }
    }

    mod decode_for_request {
        use super::*;

        #[test]
        fn write_single_coil_round_trip() {
            let req = Request::WriteSingleCoil(0x1234, true);
            let bytes: Bytes = (&req).into();
            assert_eq!(&bytes[..], &[0x05, 0x12, 0x34, 0xFF, 0x00]);

            let rsp =
                decode_response(&req, Bytes::from_static(&[0x05, 0x12, 0x34, 0xFF, 0x00])).unwrap();
            assert_eq!(rsp, Response::WriteSingleCoil(0x1234, true));

            let rsp =
                decode_response(&req, Bytes::from_static(&[0x05, 0x12, 0x34, 0x00, 0x00])).unwrap();
            assert_eq!(rsp, Response::WriteSingleCoil(0x1234, false));

            assert!(matches!(
                decode_response(&req, Bytes::from_static(&[0x05, 0x12, 0x34, 0x00])),
                Err(Error::IncompleteResponseFrame)
            ));

            assert!(matches!(
                decode_response(&req, Bytes::from_static(&[0x03, 0x00, 0x00, 0x00, 0x01])),
                Err(Error::InvalidResponseData(_))
            ));
        }

        #[test]
        fn read_coils_truncates_to_quantity() {
            let req = Request::ReadCoils(0x0000, 5);
            let rsp =
                decode_response(&req, Bytes::from_static(&[0x01, 0x01, 0b_0001_1001])).unwrap();
            assert_eq!(
                rsp,
                Response::ReadCoils(vec![true, false, false, true, true])
            );
        }

        #[test]
        fn read_coils_with_wrong_byte_count() {
            let req = Request::ReadCoils(0x0000, 5);
            // 5 coils need exactly one data byte.
            let rsp = decode_response(&req, Bytes::from_static(&[0x01, 0x02, 0x19, 0x00]));
            assert!(matches!(rsp, Err(Error::InvalidResponseData(_))));
        }

        #[test]
        fn read_registers_with_wrong_byte_count() {
            let req = Request::ReadHoldingRegisters(0x0000, 3);
            let rsp = decode_response(&req, Bytes::from_static(&[0x03, 0x04, 0x00, 0x01, 0x00, 0x02]));
            assert!(matches!(rsp, Err(Error::InvalidResponseData(_))));
        }

        // Exception frames route to the exception decoder.
        #[test]
        fn exception_frame() {
            let req = Request::ReadCoils(0x0000, 1);
            let err = decode_response(&req, Bytes::from_static(&[0x81, 0x02])).unwrap_err();
            match err {
                Error::Exception(ex) => {
                    assert_eq!(ex.function, 0x01);
                    assert_eq!(ex.exception, ExceptionCode::IllegalDataAddress);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[test]
        fn exception_frame_for_other_function() {
            let req = Request::ReadCoils(0x0000, 1);
            let err = decode_response(&req, Bytes::from_static(&[0x83, 0x02])).unwrap_err();
            assert!(matches!(err, Error::InvalidResponseData(_)));
        }

        #[test]
        fn echoed_write_quantity_mismatch() {
            let req = Request::WriteMultipleCoils(0x0013, vec![true; 10]);
            let err = decode_response(&req, Bytes::from_static(&[0x0F, 0x00, 0x13, 0x00, 0x09]))
                .unwrap_err();
            assert!(matches!(err, Error::InvalidResponseData(_)));
        }
    }
}
