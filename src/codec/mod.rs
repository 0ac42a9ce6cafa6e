// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU (de)serialization shared by all three framers (RTU/ASCII prepend a
//! slave id + CRC/LRC trailer, TCP prepends the MBAP header) and `mem`-style
//! bit/register packing helpers used by both client and server code.

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::io::{Cursor, Error, ErrorKind, Read as _, Result};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::*;

impl From<Request> for Bytes {
    fn from(req: Request) -> Bytes {
        let mut data = BytesMut::with_capacity(request_byte_count(&req));
        data.put_u8(req.function_code());
        use Request::*;
        match req {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadInputRegisters(address, quantity)
            | ReadHoldingRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, coils) => {
                data.put_u16(address);
                data.put_u16(coils.len() as u16);
                let packed = pack_coils(&coils);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            WriteMultipleRegisters(address, words) => {
                data.put_u16(address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadExceptionStatus | GetCommEventCounter | GetCommEventLog | ReportServerId => {}
            Diagnostics(sub_function, words) => {
                data.put_u16(sub_function);
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
                data.put_u16(read_address);
                data.put_u16(quantity);
                data.put_u16(write_address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(address);
                data.put_u16(and_mask);
                data.put_u16(or_mask);
            }
            ReadFifoQueue(address) => {
                data.put_u16(address);
            }
            Custom(_, custom_data) => {
                data.put_slice(&custom_data);
            }
            Disconnect => unreachable!("disconnect is never serialized onto the wire"),
        }
        data.freeze()
    }
}

impl From<RequestPdu> for Bytes {
    fn from(pdu: RequestPdu) -> Bytes {
        pdu.0.into()
    }
}

impl TryFrom<RequestPdu> for Bytes {
    type Error = Error;

    fn try_from(pdu: RequestPdu) -> Result<Self> {
        Ok(pdu.into())
    }
}

impl From<Response> for Bytes {
    fn from(rsp: Response) -> Bytes {
        let mut data = BytesMut::with_capacity(response_byte_count(&rsp));
        data.put_u8(rsp_to_fn_code(&rsp));
        use Response::*;
        match rsp {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed = pack_coils(&coils);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            }
            ReadInputRegisters(regs) | ReadHoldingRegisters(regs) | ReadWriteMultipleRegisters(regs) => {
                data.put_u8((regs.len() * 2) as u8);
                for r in regs {
                    data.put_u16(r);
                }
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadExceptionStatus(status) => {
                data.put_u8(status);
            }
            Diagnostics(sub_function, words) => {
                data.put_u16(sub_function);
                for w in words {
                    data.put_u16(w);
                }
            }
            GetCommEventCounter(status, event_count) => {
                data.put_u16(status);
                data.put_u16(event_count);
            }
            GetCommEventLog(status, event_count, message_count, events) => {
                data.put_u8((6 + events.len()) as u8);
                data.put_u16(status);
                data.put_u16(event_count);
                data.put_u16(message_count);
                data.put_slice(&events);
            }
            ReportServerId(payload) => {
                data.put_u8((payload.len() + 1) as u8);
                data.put_slice(&payload);
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(address);
                data.put_u16(and_mask);
                data.put_u16(or_mask);
            }
            ReadFifoQueue(regs) => {
                data.put_u16((2 + regs.len() * 2) as u16);
                data.put_u16(regs.len() as u16);
                for r in regs {
                    data.put_u16(r);
                }
            }
            Custom(_, custom_data) => {
                data.put_slice(&custom_data);
            }
        }
        data.freeze()
    }
}

impl From<ExceptionResponse> for Bytes {
    fn from(ex: ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        debug_assert!(ex.function < 0x80);
        data.put_u8(ex.function + 0x80);
        data.put_u8(ex.exception as u8);
        data.freeze()
    }
}

impl From<ResponsePdu> for Bytes {
    fn from(pdu: ResponsePdu) -> Bytes {
        match pdu.0 {
            Ok(rsp) => rsp.into(),
            Err(ex) => ex.into(),
        }
    }
}

impl TryFrom<Request> for Bytes {
    type Error = Error;

    fn try_from(req: Request) -> Result<Self> {
        Ok(req.into())
    }
}

impl TryFrom<Bytes> for Request {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        use Request::*;
        let mut rdr = Cursor::new(&bytes);
        let fn_code = rdr.read_u8()?;
        let req = match fn_code {
            0x01 => ReadCoils(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x02 => ReadDiscreteInputs(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x03 => ReadHoldingRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x04 => ReadInputRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x05 => WriteSingleCoil(
                rdr.read_u16::<BigEndian>()?,
                coil_to_bool(rdr.read_u16::<BigEndian>()?)?,
            ),
            0x06 => WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x07 => ReadExceptionStatus,
            0x08 => {
                let sub_function = rdr.read_u16::<BigEndian>()?;
                let mut words = vec![];
                while let Ok(w) = rdr.read_u16::<BigEndian>() {
                    words.push(w);
                }
                Diagnostics(sub_function, words)
            }
            0x0B => GetCommEventCounter,
            0x0C => GetCommEventLog,
            0x0F => {
                let address = rdr.read_u16::<BigEndian>()?;
                let quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != packed_coils_len(usize::from(quantity)) {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "byte count does not match coil quantity",
                    ));
                }
                let mut coil_bytes = vec![0; byte_count as usize];
                rdr.read_exact(&mut coil_bytes)?;
                WriteMultipleCoils(address, unpack_coils(&coil_bytes, quantity))
            }
            0x10 => {
                let address = rdr.read_u16::<BigEndian>()?;
                let quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != usize::from(quantity) * 2 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "byte count does not match register quantity",
                    ));
                }
                let mut words = Vec::with_capacity(quantity as usize);
                for _ in 0..quantity {
                    words.push(rdr.read_u16::<BigEndian>()?);
                }
                WriteMultipleRegisters(address, words)
            }
            0x11 => ReportServerId,
            0x16 => MaskWriteRegister(
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
            ),
            0x17 => {
                let read_address = rdr.read_u16::<BigEndian>()?;
                let read_quantity = rdr.read_u16::<BigEndian>()?;
                let write_address = rdr.read_u16::<BigEndian>()?;
                let write_quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != usize::from(write_quantity) * 2 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "byte count does not match register quantity",
                    ));
                }
                let mut words = Vec::with_capacity(write_quantity as usize);
                for _ in 0..write_quantity {
                    words.push(rdr.read_u16::<BigEndian>()?);
                }
                ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words)
            }
            0x18 => ReadFifoQueue(rdr.read_u16::<BigEndian>()?),
            _ => {
                let pos = rdr.position() as usize;
                Custom(fn_code, bytes.slice(pos..).to_vec())
            }
        };
        Ok(req)
    }
}

impl TryFrom<Bytes> for RequestPdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        Request::try_from(bytes).map(RequestPdu)
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        let mut rdr = Cursor::new(&bytes);
        let fn_code = rdr.read_u8()?;
        if fn_code >= 0x80 {
            let exception = rdr.read_u8()?;
            let exception = Exception::try_from(exception).map_err(|()| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("Invalid exception code: 0x{exception:0>2X}"),
                )
            })?;
            return Ok(ResponsePdu(Err(ExceptionResponse {
                function: fn_code - 0x80,
                exception,
            })));
        }
        use Response::*;
        let rsp = match fn_code {
            0x01 => {
                let byte_count = rdr.read_u8()?;
                let mut coil_bytes = vec![0; byte_count as usize];
                rdr.read_exact(&mut coil_bytes)?;
                ReadCoils(unpack_coils(&coil_bytes, u16::from(byte_count) * 8))
            }
            0x02 => {
                let byte_count = rdr.read_u8()?;
                let mut coil_bytes = vec![0; byte_count as usize];
                rdr.read_exact(&mut coil_bytes)?;
                ReadDiscreteInputs(unpack_coils(&coil_bytes, u16::from(byte_count) * 8))
            }
            0x03 => ReadHoldingRegisters(read_registers(&mut rdr)?),
            0x04 => ReadInputRegisters(read_registers(&mut rdr)?),
            0x05 => WriteSingleCoil(
                rdr.read_u16::<BigEndian>()?,
                coil_to_bool(rdr.read_u16::<BigEndian>()?)?,
            ),
            0x06 => WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x07 => ReadExceptionStatus(rdr.read_u8()?),
            0x08 => {
                let sub_function = rdr.read_u16::<BigEndian>()?;
                let mut words = vec![];
                while let Ok(w) = rdr.read_u16::<BigEndian>() {
                    words.push(w);
                }
                Diagnostics(sub_function, words)
            }
            0x0B => GetCommEventCounter(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x0C => {
                let _byte_count = rdr.read_u8()?;
                let status = rdr.read_u16::<BigEndian>()?;
                let event_count = rdr.read_u16::<BigEndian>()?;
                let message_count = rdr.read_u16::<BigEndian>()?;
                let pos = rdr.position() as usize;
                GetCommEventLog(status, event_count, message_count, bytes.slice(pos..).to_vec())
            }
            0x0F => WriteMultipleCoils(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x10 => WriteMultipleRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x11 => {
                let _byte_count = rdr.read_u8()?;
                let pos = rdr.position() as usize;
                ReportServerId(bytes.slice(pos..).to_vec())
            }
            0x16 => MaskWriteRegister(
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
            ),
            0x17 => ReadWriteMultipleRegisters(read_registers(&mut rdr)?),
            0x18 => {
                let _byte_count = rdr.read_u16::<BigEndian>()?;
                let fifo_count = rdr.read_u16::<BigEndian>()?;
                let mut words = Vec::with_capacity(fifo_count as usize);
                for _ in 0..fifo_count {
                    words.push(rdr.read_u16::<BigEndian>()?);
                }
                ReadFifoQueue(words)
            }
            _ => {
                let pos = rdr.position() as usize;
                Custom(fn_code, bytes.slice(pos..).to_vec())
            }
        };
        Ok(ResponsePdu(Ok(rsp)))
    }
}

fn read_registers(rdr: &mut Cursor<&Bytes>) -> Result<Vec<Word>> {
    let byte_count = rdr.read_u8()?;
    let mut words = Vec::with_capacity(usize::from(byte_count) / 2);
    for _ in 0..byte_count / 2 {
        words.push(rdr.read_u16::<BigEndian>()?);
    }
    Ok(words)
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid coil value: 0x{coil:0>4X}"),
        )),
    }
}

fn packed_coils_len(bitcount: usize) -> usize {
    (bitcount + 7) / 8
}

fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    let mut res = vec![0; packed_coils_len(coils.len())];
    for (i, b) in coils.iter().enumerate() {
        if *b {
            res[i / 8] |= 1 << (i % 8);
        }
    }
    res
}

fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count as usize);
    for i in 0..count {
        res.push((bytes[usize::from(i / 8)] >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn rsp_to_fn_code(rsp: &Response) -> u8 {
    use Response::*;
    match *rsp {
        ReadCoils(_) => 0x01,
        ReadDiscreteInputs(_) => 0x02,
        WriteSingleCoil(..) => 0x05,
        WriteMultipleCoils(..) => 0x0F,
        ReadInputRegisters(_) => 0x04,
        ReadHoldingRegisters(_) => 0x03,
        WriteSingleRegister(..) => 0x06,
        WriteMultipleRegisters(..) => 0x10,
        ReadExceptionStatus(_) => 0x07,
        Diagnostics(..) => 0x08,
        GetCommEventCounter(..) => 0x0B,
        GetCommEventLog(..) => 0x0C,
        ReportServerId(_) => 0x11,
        ReadWriteMultipleRegisters(_) => 0x17,
        MaskWriteRegister(..) => 0x16,
        ReadFifoQueue(_) => 0x18,
        Custom(code, _) => code,
    }
}

fn request_byte_count(req: &Request) -> usize {
    use Request::*;
    match *req {
        ReadCoils(..)
        | ReadDiscreteInputs(..)
        | ReadInputRegisters(..)
        | ReadHoldingRegisters(..)
        | WriteSingleRegister(..)
        | WriteSingleCoil(..) => 5,
        WriteMultipleCoils(_, ref coils) => 6 + packed_coils_len(coils.len()),
        WriteMultipleRegisters(_, ref data) => 6 + data.len() * 2,
        ReadExceptionStatus | GetCommEventCounter | GetCommEventLog | ReportServerId => 1,
        Diagnostics(_, ref data) => 3 + data.len() * 2,
        ReadWriteMultipleRegisters(_, _, _, ref data) => 10 + data.len() * 2,
        MaskWriteRegister(..) => 7,
        ReadFifoQueue(_) => 3,
        Custom(_, ref data) => 1 + data.len(),
        Disconnect => 0,
    }
}

fn response_byte_count(rsp: &Response) -> usize {
    use Response::*;
    match *rsp {
        ReadCoils(ref coils) | ReadDiscreteInputs(ref coils) => 2 + packed_coils_len(coils.len()),
        WriteSingleCoil(..) | WriteMultipleCoils(..) | WriteMultipleRegisters(..) | WriteSingleRegister(..) => 5,
        ReadInputRegisters(ref data) | ReadHoldingRegisters(ref data) | ReadWriteMultipleRegisters(ref data) => {
            2 + data.len() * 2
        }
        ReadExceptionStatus(_) => 2,
        Diagnostics(_, ref data) => 3 + data.len() * 2,
        GetCommEventCounter(..) => 5,
        GetCommEventLog(_, _, _, ref events) => 7 + events.len(),
        ReportServerId(ref payload) => 2 + payload.len(),
        MaskWriteRegister(..) => 7,
        ReadFifoQueue(ref data) => 5 + data.len() * 2,
        Custom(_, ref data) => 1 + data.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_read_holding_registers_request() {
        let req = Request::ReadHoldingRegisters(0x082b, 2);
        let bytes: Bytes = req.clone().into();
        assert_eq!(&bytes[..], &[0x03, 0x08, 0x2B, 0x00, 0x02]);
        assert_eq!(Request::try_from(bytes).unwrap(), req);
    }

    #[test]
    fn roundtrip_write_multiple_coils_request() {
        let req = Request::WriteMultipleCoils(0x13, vec![true, false, true, true, false]);
        let bytes: Bytes = req.clone().into();
        assert_eq!(Request::try_from(bytes).unwrap(), req);
    }

    #[test]
    fn roundtrip_mask_write_register() {
        let req = Request::MaskWriteRegister(0x04, 0x00F2, 0x0025);
        let bytes: Bytes = req.clone().into();
        assert_eq!(Request::try_from(bytes).unwrap(), req);
    }

    #[test]
    fn decode_exception_response() {
        let bytes = Bytes::from_static(&[0x83, 0x02]);
        let ResponsePdu(res) = ResponsePdu::try_from(bytes).unwrap();
        let err = res.unwrap_err();
        assert_eq!(err.function, 0x03);
        assert_eq!(err.exception, Exception::IllegalDataAddress);
    }

    #[test]
    fn decode_read_fifo_queue_response() {
        let bytes = Bytes::from_static(&[0x18, 0x00, 0x06, 0x00, 0x02, 0x01, 0x01, 0x02, 0x02]);
        let ResponsePdu(res) = ResponsePdu::try_from(bytes).unwrap();
        assert_eq!(res.unwrap(), Response::ReadFifoQueue(vec![0x0101, 0x0202]));
    }

    #[test]
    fn pack_unpack_coils() {
        let coils = vec![true, false, true, true, false, false, false, true, true];
        let packed = pack_coils(&coils);
        let unpacked = unpack_coils(&packed, coils.len() as u16);
        assert_eq!(coils, unpacked);
    }
}
