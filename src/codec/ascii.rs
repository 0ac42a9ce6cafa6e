// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII framing: `:` + hex(unit id, function code, payload, LRC) + CRLF.
//!
//! Mirrors the same `Decoder`/`Encoder` shape as [`super::rtu`],
//! substituting LRC-over-hex framing for CRC-over-binary framing.

use std::io::{Error, ErrorKind, Result};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::ascii::*;
use crate::slave::SlaveId;

use super::*;

const MAX_FRAME_LEN: usize = 513; // 1 (':') + 2*255 (hex) + 2 (CRLF)

/// Two's complement of the sum of all bytes, truncated to 8 bits.
pub(crate) fn calc_lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

pub(crate) fn bytes_to_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{b:02X}"));
    }
    s
}

pub(crate) fn hex_to_bytes(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::new(ErrorKind::InvalidData, "odd number of hex digits"));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks(2) {
        let hi = hex_nibble(pair[0])?;
        let lo = hex_nibble(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid ASCII hex character: {:?}", c as char),
        )),
    }
}

fn find_frame(buf: &[u8]) -> Option<(usize, usize)> {
    let start = buf.iter().position(|&b| b == b':')?;
    let end = buf[start..].windows(2).position(|w| w == b"\r\n")?;
    Some((start, start + end + 2))
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec;

fn decode(buf: &mut BytesMut) -> Result<Option<(SlaveId, Bytes)>> {
    let Some((start, end)) = find_frame(buf) else {
        if buf.len() > MAX_FRAME_LEN {
            let dropped = buf.split_to(buf.len() - 1);
            log::warn!("Dropping {} byte(s) without a complete ASCII frame", dropped.len());
        }
        return Ok(None);
    };

    if start > 0 {
        log::debug!("Dropping {start} byte(s) preceding the ':' frame marker");
    }

    let frame = buf.split_to(end);
    let hex = &frame[start + 1..frame.len() - 2];

    let raw = hex_to_bytes(hex)?;
    if raw.len() < 2 {
        return Err(Error::new(ErrorKind::InvalidData, "ASCII frame too short"));
    }
    let (body, lrc_byte) = raw.split_at(raw.len() - 1);
    let expected_lrc = lrc_byte[0];
    let actual_lrc = calc_lrc(body);
    if expected_lrc != actual_lrc {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid LRC: expected = 0x{expected_lrc:0>2X}, actual = 0x{actual_lrc:0>2X}"),
        ));
    }

    let slave_id = body[0];
    let pdu_data = Bytes::copy_from_slice(&body[1..]);
    Ok(Some((slave_id, pdu_data)))
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        let Some((slave_id, pdu_data)) = decode(buf)? else {
            return Ok(None);
        };
        let hdr = Header { slave_id };
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr, pdu }))
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>> {
        let Some((slave_id, pdu_data)) = decode(buf)? else {
            return Ok(None);
        };
        let hdr = Header { slave_id };
        let pdu = RequestPdu::try_from(pdu_data)?;
        Ok(Some(RequestAdu {
            hdr,
            pdu,
            disconnect: false,
        }))
    }
}

fn encode_frame(slave_id: SlaveId, pdu_data: &[u8], buf: &mut BytesMut) {
    let mut body = Vec::with_capacity(1 + pdu_data.len() + 1);
    body.push(slave_id);
    body.extend_from_slice(pdu_data);
    body.push(calc_lrc(&body));

    buf.reserve(1 + body.len() * 2 + 2);
    buf.extend_from_slice(b":");
    buf.extend_from_slice(bytes_to_hex(&body).as_bytes());
    buf.extend_from_slice(b"\r\n");
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        if adu.disconnect {
            return Err(Error::new(
                ErrorKind::NotConnected,
                "Disconnecting - not an error",
            ));
        }
        let RequestAdu { hdr, pdu, .. } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        encode_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        encode_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Request;

    #[test]
    fn lrc_of_known_frame() {
        // ":010300000001FA" without trailing LRC byte; 0xFA is the LRC.
        let body = hex_to_bytes(b"0103000000012A").unwrap();
        let (data, lrc) = body.split_at(body.len() - 1);
        assert_eq!(calc_lrc(data), lrc[0]);
    }

    #[test]
    fn roundtrip_read_request() {
        let mut client = ClientCodec;
        let mut server = ServerCodec;
        let mut buf = BytesMut::new();

        let req = Request::ReadHoldingRegisters(0, 1);
        let hdr = Header { slave_id: 0x01 };
        let adu = RequestAdu {
            hdr,
            pdu: req.into(),
            disconnect: false,
        };
        client.encode(adu, &mut buf).unwrap();
        assert!(buf.starts_with(b":"));
        assert!(buf.ends_with(b"\r\n"));

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.hdr.slave_id, 0x01);
        assert!(buf.is_empty());
    }
}
