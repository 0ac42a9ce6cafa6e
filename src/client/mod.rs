#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tcp")]
pub mod tcp;

pub mod util;

use std::fmt::Debug;
use std::io::{Error, ErrorKind};

use crate::frame::*;
use crate::slave::*;

/// A transport independent asynchronous client trait.
#[async_trait::async_trait]
pub trait Client: SlaveContext + Send {
    /// Invokes a Modbus request and returns the raw response.
    async fn call(&mut self, request: Request) -> Result<Response, Error>;
}

/// An asynchronous Modbus reader.
#[async_trait::async_trait]
pub trait Reader: Client {
    async fn read_coils(&mut self, _: Address, _: Quantity) -> Result<Vec<Coil>, Error>;

    async fn read_discrete_inputs(&mut self, _: Address, _: Quantity)
        -> Result<Vec<Coil>, Error>;

    async fn read_input_registers(&mut self, _: Address, _: Quantity)
        -> Result<Vec<Word>, Error>;

    async fn read_holding_registers(
        &mut self,
        _: Address,
        _: Quantity,
    ) -> Result<Vec<Word>, Error>;

    async fn read_write_multiple_registers(
        &mut self,
        _: Address,
        _: Quantity,
        _: Address,
        _: &[Word],
    ) -> Result<Vec<Word>, Error>;

    async fn read_exception_status(&mut self) -> Result<u8, Error>;

    async fn read_fifo_queue(&mut self, _: Address) -> Result<Vec<Word>, Error>;
}

/// An asynchronous Modbus writer.
#[async_trait::async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&mut self, _: Address, _: Coil) -> Result<(), Error>;

    async fn write_multiple_coils(&mut self, _: Address, _: &[Coil]) -> Result<(), Error>;

    async fn write_single_register(&mut self, _: Address, _: Word) -> Result<(), Error>;

    async fn write_multiple_registers(&mut self, _: Address, _: &[Word]) -> Result<(), Error>;

    async fn mask_write_register(
        &mut self,
        _: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<(), Error>;
}

/// Diagnostic and serial line functions (0x08, 0x0B, 0x0C, 0x11), kept
/// separate from [`Reader`]/[`Writer`] since they report on the device
/// itself rather than reading or writing its register/coil space.
#[async_trait::async_trait]
pub trait Diagnostics: Client {
    /// Loops `data` back through the indicated diagnostic sub-function.
    async fn diagnostics(&mut self, _sub_function: u16, _data: &[u16]) -> Result<Vec<u16>, Error>;

    /// Returns `(status, event_count)`.
    async fn get_comm_event_counter(&mut self) -> Result<(u16, u16), Error>;

    /// Returns `(status, event_count, message_count, events)`.
    async fn get_comm_event_log(&mut self) -> Result<(u16, u16, u16, Vec<u8>), Error>;

    async fn report_server_id(&mut self) -> Result<Vec<u8>, Error>;
}

/// An asynchronous Modbus client context.
pub struct Context {
    client: Box<dyn Client>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

impl Context {
    /// Disconnects the client, releasing the underlying transport.
    ///
    /// Disconnecting is expected to fail: the service end of the channel
    /// is dropped without ever producing a response, so the only "good"
    /// outcomes are [`ErrorKind::NotConnected`] or [`ErrorKind::BrokenPipe`].
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        match self.client.call(Request::Disconnect).await {
            Ok(_) => unreachable!(),
            Err(err) => match err.kind() {
                ErrorKind::NotConnected | ErrorKind::BrokenPipe => Ok(()),
                _ => Err(err),
            },
        }
    }
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self { client }
    }
}

impl From<Context> for Box<dyn Client> {
    fn from(context: Context) -> Self {
        context.client
    }
}

#[async_trait::async_trait]
impl Client for Context {
    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        self.client.call(request).await
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.client.set_slave(slave);
    }
}

fn unexpected_response() -> Error {
    Error::new(ErrorKind::InvalidData, "unexpected response")
}

fn invalid_response() -> Error {
    Error::new(ErrorKind::InvalidData, "invalid response")
}

#[async_trait::async_trait]
impl Reader for Context {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>, Error> {
        let rsp = self.client.call(Request::ReadCoils(addr, cnt)).await?;
        if let Response::ReadCoils(mut coils) = rsp {
            debug_assert!(coils.len() >= cnt as usize);
            coils.truncate(cnt as usize);
            Ok(coils)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_discrete_inputs(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, Error> {
        let rsp = self
            .client
            .call(Request::ReadDiscreteInputs(addr, cnt))
            .await?;
        if let Response::ReadDiscreteInputs(mut coils) = rsp {
            debug_assert!(coils.len() >= cnt as usize);
            coils.truncate(cnt as usize);
            Ok(coils)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        let rsp = self
            .client
            .call(Request::ReadInputRegisters(addr, cnt))
            .await?;
        if let Response::ReadInputRegisters(rsp) = rsp {
            if rsp.len() != cnt as usize {
                return Err(invalid_response());
            }
            Ok(rsp)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        let rsp = self
            .client
            .call(Request::ReadHoldingRegisters(addr, cnt))
            .await?;
        if let Response::ReadHoldingRegisters(rsp) = rsp {
            if rsp.len() != cnt as usize {
                return Err(invalid_response());
            }
            Ok(rsp)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>, Error> {
        let rsp = self
            .client
            .call(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_cnt,
                write_addr,
                write_data.to_vec(),
            ))
            .await?;
        if let Response::ReadWriteMultipleRegisters(rsp) = rsp {
            if rsp.len() != read_cnt as usize {
                return Err(invalid_response());
            }
            Ok(rsp)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_exception_status(&mut self) -> Result<u8, Error> {
        let rsp = self.client.call(Request::ReadExceptionStatus).await?;
        if let Response::ReadExceptionStatus(status) = rsp {
            Ok(status)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>, Error> {
        let rsp = self.client.call(Request::ReadFifoQueue(addr)).await?;
        if let Response::ReadFifoQueue(rsp) = rsp {
            Ok(rsp)
        } else {
            Err(unexpected_response())
        }
    }
}

#[async_trait::async_trait]
impl Writer for Context {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<(), Error> {
        let rsp = self
            .client
            .call(Request::WriteSingleCoil(addr, coil))
            .await?;
        if let Response::WriteSingleCoil(rsp_addr) = rsp {
            if rsp_addr != addr {
                return Err(invalid_response());
            }
            Ok(())
        } else {
            Err(unexpected_response())
        }
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<(), Error> {
        let cnt = coils.len();
        let rsp = self
            .client
            .call(Request::WriteMultipleCoils(addr, coils.to_vec()))
            .await?;
        if let Response::WriteMultipleCoils(rsp_addr, rsp_cnt) = rsp {
            if rsp_addr != addr || rsp_cnt as usize != cnt {
                return Err(invalid_response());
            }
            Ok(())
        } else {
            Err(unexpected_response())
        }
    }

    async fn write_single_register(&mut self, addr: Address, data: Word) -> Result<(), Error> {
        let rsp = self
            .client
            .call(Request::WriteSingleRegister(addr, data))
            .await?;
        if let Response::WriteSingleRegister(rsp_addr, rsp_word) = rsp {
            if rsp_addr != addr || rsp_word != data {
                return Err(invalid_response());
            }
            Ok(())
        } else {
            Err(unexpected_response())
        }
    }

    async fn write_multiple_registers(&mut self, addr: Address, data: &[Word]) -> Result<(), Error> {
        let cnt = data.len();
        let rsp = self
            .client
            .call(Request::WriteMultipleRegisters(addr, data.to_vec()))
            .await?;
        if let Response::WriteMultipleRegisters(rsp_addr, rsp_cnt) = rsp {
            if rsp_addr != addr || rsp_cnt as usize != cnt {
                return Err(invalid_response());
            }
            Ok(())
        } else {
            Err(unexpected_response())
        }
    }

    async fn mask_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<(), Error> {
        let rsp = self
            .client
            .call(Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?;
        if let Response::MaskWriteRegister(rsp_addr, rsp_and, rsp_or) = rsp {
            if rsp_addr != addr || rsp_and != and_mask || rsp_or != or_mask {
                return Err(invalid_response());
            }
            Ok(())
        } else {
            Err(unexpected_response())
        }
    }
}

#[async_trait::async_trait]
impl Diagnostics for Context {
    async fn diagnostics(&mut self, sub_function: u16, data: &[u16]) -> Result<Vec<u16>, Error> {
        let rsp = self
            .client
            .call(Request::Diagnostics(sub_function, data.to_vec()))
            .await?;
        if let Response::Diagnostics(rsp_sub_function, rsp_data) = rsp {
            if rsp_sub_function != sub_function {
                return Err(invalid_response());
            }
            Ok(rsp_data)
        } else {
            Err(unexpected_response())
        }
    }

    async fn get_comm_event_counter(&mut self) -> Result<(u16, u16), Error> {
        let rsp = self.client.call(Request::GetCommEventCounter).await?;
        if let Response::GetCommEventCounter(status, count) = rsp {
            Ok((status, count))
        } else {
            Err(unexpected_response())
        }
    }

    async fn get_comm_event_log(&mut self) -> Result<(u16, u16, u16, Vec<u8>), Error> {
        let rsp = self.client.call(Request::GetCommEventLog).await?;
        if let Response::GetCommEventLog(status, event_count, message_count, events) = rsp {
            Ok((status, event_count, message_count, events))
        } else {
            Err(unexpected_response())
        }
    }

    async fn report_server_id(&mut self) -> Result<Vec<u8>, Error> {
        let rsp = self.client.call(Request::ReportServerId).await?;
        if let Response::ReportServerId(data) = rsp {
            Ok(data)
        } else {
            Err(unexpected_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;

    #[derive(Default, Debug)]
    pub struct ClientMock {
        slave: Option<Slave>,
        last_request: RefCell<Option<Request>>,
        next_response: Option<Result<Response, Error>>,
    }

    #[allow(dead_code)]
    impl ClientMock {
        pub fn slave(&self) -> Option<Slave> {
            self.slave
        }

        pub fn last_request(&self) -> &RefCell<Option<Request>> {
            &self.last_request
        }

        pub fn set_next_response(&mut self, next_response: Result<Response, Error>) {
            self.next_response = Some(next_response);
        }
    }

    #[async_trait::async_trait]
    impl Client for ClientMock {
        async fn call(&mut self, request: Request) -> Result<Response, Error> {
            self.last_request.replace(Some(request));
            match self.next_response.as_ref().unwrap() {
                Ok(response) => Ok(response.clone()),
                Err(err) => Err(Error::new(err.kind(), format!("{err}"))),
            }
        }
    }

    impl SlaveContext for ClientMock {
        fn set_slave(&mut self, slave: Slave) {
            self.slave = Some(slave);
        }
    }

    #[tokio::test]
    async fn read_some_coils() {
        // The protocol will always return entire bytes with, i.e.
        // a multiple of 8 coils.
        let response_coils = [true, false, false, true, false, true, false, true].to_vec();
        for num_coils in 1usize..8usize {
            let mut client = Box::new(ClientMock::default());
            client.set_next_response(Ok(Response::ReadCoils(response_coils.clone())));
            let mut context = Context { client };
            context.set_slave(Slave(1));
            let coils = context.read_coils(1, num_coils as u16).await.unwrap();
            assert_eq!(&response_coils[0..num_coils], &coils[..]);
        }
    }

    #[tokio::test]
    async fn read_some_discrete_inputs() {
        // The protocol will always return entire bytes with, i.e.
        // a multiple of 8 coils.
        let response_inputs = [true, false, false, true, false, true, false, true].to_vec();
        for num_inputs in 1usize..8usize {
            let mut client = Box::new(ClientMock::default());
            client.set_next_response(Ok(Response::ReadDiscreteInputs(response_inputs.clone())));
            let mut context = Context { client };
            context.set_slave(Slave(1));
            let inputs = context
                .read_discrete_inputs(1, num_inputs as u16)
                .await
                .unwrap();
            assert_eq!(&response_inputs[0..num_inputs], &inputs[..]);
        }
    }

    #[tokio::test]
    async fn mask_write_register_rejects_mismatched_response() {
        let mut client = Box::new(ClientMock::default());
        client.set_next_response(Ok(Response::MaskWriteRegister(0x04, 0x00FF, 0x0000)));
        let mut context = Context { client };
        let err = context
            .mask_write_register(0x04, 0x00F0, 0x0010)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
