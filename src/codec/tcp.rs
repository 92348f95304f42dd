// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::Error,
    frame::{
        tcp::{Header, RequestAdu, ResponseAdu},
        MAX_PDU_LEN,
    },
};

const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        // len covers the unit id byte and the PDU
        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        if len == 0 {
            return Err(Error::InvalidResponseData("invalid MBAP length"));
        }
        let pdu_len = len - 1;
        if pdu_len > MAX_PDU_LEN {
            return Err(Error::InvalidResponseData("frame exceeds maximum length"));
        }
        if buf.len() < HEADER_LEN + pdu_len {
            // Incomplete frame
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);
        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::InvalidResponseData(
                "protocol identifier is not Modbus",
            ));
        }
        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];

        let pdu = buf.split_to(pdu_len).freeze();

        Ok(Some(ResponseAdu {
            hdr: Header {
                transaction_id,
                unit_id,
            },
            pdu,
        }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = (&pdu).into();
        buf.reserve(pdu_data.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16((pdu_data.len() + 1) as u16);
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        Ok(())
    }
}
