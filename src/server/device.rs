// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The device-facing half of the server resource engine: an async
//! trait with one method per Modbus function, a unit-admission filter,
//! and an adapter that turns any [`Device`] into a [`Service`].

use std::sync::Arc;

use crate::frame::*;
use crate::server::service::Service;
use crate::slave::SlaveId;

/// One method per Modbus function a server device can implement.
///
/// Methods return `Exception::IllegalFunction` by default so that a
/// device only needs to override the operations it actually supports.
#[async_trait::async_trait]
pub trait Device: Send + Sync {
    async fn read_coils(&self, _addr: Address, _cnt: Quantity) -> Result<Vec<Coil>, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn read_discrete_inputs(
        &self,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Coil>, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn write_single_coil(&self, _addr: Address, _coil: Coil) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn write_multiple_coils(&self, _addr: Address, _coils: &[Coil]) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn read_input_registers(
        &self,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Word>, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn read_holding_registers(
        &self,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Word>, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn write_single_register(&self, _addr: Address, _data: Word) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn write_multiple_registers(
        &self,
        _addr: Address,
        _data: &[Word],
    ) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn read_exception_status(&self) -> Result<u8, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn diagnostics(&self, _sub_function: u16, _data: &[u16]) -> Result<Vec<u16>, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn get_comm_event_counter(&self) -> Result<(u16, u16), Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn get_comm_event_log(&self) -> Result<(u16, u16, u16, Vec<u8>), Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn report_server_id(&self) -> Result<Vec<u8>, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn read_write_multiple_registers(
        &self,
        _read_addr: Address,
        _read_cnt: Quantity,
        _write_addr: Address,
        _write_data: &[Word],
    ) -> Result<Vec<Word>, Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn mask_write_register(
        &self,
        _addr: Address,
        _and_mask: Word,
        _or_mask: Word,
    ) -> Result<(), Exception> {
        Err(Exception::IllegalFunction)
    }

    async fn read_fifo_queue(&self, _addr: Address) -> Result<Vec<Word>, Exception> {
        Err(Exception::IllegalFunction)
    }
}

/// A bitmap of admitted unit/slave ids, used by the listener to decide
/// whether an incoming request's unit id should be handled at all
/// before it ever reaches a [`Device`].
///
/// Broadcast (unit id `0`) is tracked separately: admitting it means
/// the server will process broadcasts, but - per the Modbus
/// specification - never reply to them.
#[derive(Debug, Clone)]
pub struct UnitMap {
    bits: [u64; 4], // 256 possible unit ids
    broadcast_enabled: bool,
}

impl UnitMap {
    /// A map admitting exactly one unit id, with broadcast disabled.
    #[must_use]
    pub fn single(unit_id: SlaveId) -> Self {
        let mut map = Self::empty();
        map.insert(unit_id);
        map
    }

    /// An empty map admitting nothing until ids are inserted.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bits: [0; 4],
            broadcast_enabled: false,
        }
    }

    /// A map admitting every unit id, useful for gateways.
    #[must_use]
    pub fn all() -> Self {
        Self {
            bits: [u64::MAX; 4],
            broadcast_enabled: true,
        }
    }

    pub fn insert(&mut self, unit_id: SlaveId) {
        let idx = usize::from(unit_id);
        self.bits[idx / 64] |= 1 << (idx % 64);
    }

    pub fn remove(&mut self, unit_id: SlaveId) {
        let idx = usize::from(unit_id);
        self.bits[idx / 64] &= !(1 << (idx % 64));
    }

    #[must_use]
    pub fn contains(&self, unit_id: SlaveId) -> bool {
        let idx = usize::from(unit_id);
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }

    pub fn set_broadcast_enabled(&mut self, enabled: bool) {
        self.broadcast_enabled = enabled;
    }

    #[must_use]
    pub fn broadcast_enabled(&self) -> bool {
        self.broadcast_enabled
    }
}

/// Adapts a [`Device`] to the listener-facing [`Service`] trait,
/// dispatching each [`Request`] variant to the matching `Device`
/// method and folding the result back into a [`Response`] or
/// [`ExceptionResponse`].
#[derive(Debug)]
pub struct DeviceService<D> {
    device: Arc<D>,
}

impl<D> DeviceService<D> {
    #[must_use]
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }
}

impl<D> Clone for DeviceService<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
        }
    }
}

impl<D> Service for DeviceService<D>
where
    D: Device + 'static,
{
    type Request = Request;
    type Response = Result<Response, ExceptionResponse>;
    type Error = std::io::Error;
    type Future =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let device = Arc::clone(&self.device);
        Box::pin(async move { Ok(dispatch(&*device, req).await) })
    }
}

/// Maximum discrete (coil/discrete-input) quantity a single request may
/// carry, dictated by the 255-byte data-byte ceiling of the PDU
/// (`2040 = 255 * 8`).
const MAX_DISCRETE_QUANTITY: Quantity = 2040;

/// Maximum register quantity a single request may carry, dictated by
/// the same 255-byte data-byte ceiling (`127 = (255 - 1) / 2`).
const MAX_REGISTER_QUANTITY: Quantity = 127;

fn check_quantity(cnt: Quantity, max: Quantity) -> Result<(), Exception> {
    if cnt == 0 || cnt > max {
        Err(Exception::IllegalDataValue)
    } else {
        Ok(())
    }
}

async fn dispatch<D: Device + ?Sized>(
    device: &D,
    req: Request,
) -> Result<Response, ExceptionResponse> {
    let function = req.function_code();
    let result = match req {
        Request::ReadCoils(addr, cnt) => async {
            check_quantity(cnt, MAX_DISCRETE_QUANTITY)?;
            device.read_coils(addr, cnt).await
        }
        .await
        .map(Response::ReadCoils),
        Request::ReadDiscreteInputs(addr, cnt) => async {
            check_quantity(cnt, MAX_DISCRETE_QUANTITY)?;
            device.read_discrete_inputs(addr, cnt).await
        }
        .await
        .map(Response::ReadDiscreteInputs),
        Request::WriteSingleCoil(addr, coil) => device
            .write_single_coil(addr, coil)
            .await
            .map(|()| Response::WriteSingleCoil(addr)),
        Request::WriteMultipleCoils(addr, coils) => {
            let cnt = coils.len() as Quantity;
            async {
                check_quantity(cnt, MAX_DISCRETE_QUANTITY)?;
                device.write_multiple_coils(addr, &coils).await
            }
            .await
            .map(|()| Response::WriteMultipleCoils(addr, cnt))
        }
        Request::ReadInputRegisters(addr, cnt) => async {
            check_quantity(cnt, MAX_REGISTER_QUANTITY)?;
            device.read_input_registers(addr, cnt).await
        }
        .await
        .map(Response::ReadInputRegisters),
        Request::ReadHoldingRegisters(addr, cnt) => async {
            check_quantity(cnt, MAX_REGISTER_QUANTITY)?;
            device.read_holding_registers(addr, cnt).await
        }
        .await
        .map(Response::ReadHoldingRegisters),
        Request::WriteSingleRegister(addr, data) => device
            .write_single_register(addr, data)
            .await
            .map(|()| Response::WriteSingleRegister(addr, data)),
        Request::WriteMultipleRegisters(addr, data) => {
            let cnt = data.len() as Quantity;
            async {
                check_quantity(cnt, MAX_REGISTER_QUANTITY)?;
                device.write_multiple_registers(addr, &data).await
            }
            .await
            .map(|()| Response::WriteMultipleRegisters(addr, cnt))
        }
        Request::ReadExceptionStatus => device
            .read_exception_status()
            .await
            .map(Response::ReadExceptionStatus),
        Request::Diagnostics(sub_function, data) => device
            .diagnostics(sub_function, &data)
            .await
            .map(|data| Response::Diagnostics(sub_function, data)),
        Request::GetCommEventCounter => device
            .get_comm_event_counter()
            .await
            .map(|(status, count)| Response::GetCommEventCounter(status, count)),
        Request::GetCommEventLog => device
            .get_comm_event_log()
            .await
            .map(|(status, event_count, message_count, events)| {
                Response::GetCommEventLog(status, event_count, message_count, events)
            }),
        Request::ReportServerId => device.report_server_id().await.map(Response::ReportServerId),
        Request::ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, write_data) => async {
            check_quantity(read_cnt, MAX_REGISTER_QUANTITY)?;
            check_quantity(write_data.len() as Quantity, MAX_REGISTER_QUANTITY)?;
            device
                .read_write_multiple_registers(read_addr, read_cnt, write_addr, &write_data)
                .await
        }
        .await
        .map(Response::ReadWriteMultipleRegisters),
        Request::MaskWriteRegister(addr, and_mask, or_mask) => device
            .mask_write_register(addr, and_mask, or_mask)
            .await
            .map(|()| Response::MaskWriteRegister(addr, and_mask, or_mask)),
        Request::ReadFifoQueue(addr) => device
            .read_fifo_queue(addr)
            .await
            .map(Response::ReadFifoQueue),
        Request::Custom(..) | Request::Disconnect => Err(Exception::IllegalFunction),
    };
    result.map_err(|exception| ExceptionResponse { function, exception })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoDevice;

    #[async_trait::async_trait]
    impl Device for EchoDevice {
        async fn read_holding_registers(
            &self,
            addr: Address,
            cnt: Quantity,
        ) -> Result<Vec<Word>, Exception> {
            Ok((0..cnt).map(|i| addr + i).collect())
        }
    }

    #[tokio::test]
    async fn dispatches_implemented_function() {
        let service = DeviceService::new(Arc::new(EchoDevice));
        let rsp = service.call(Request::ReadHoldingRegisters(10, 3)).await.unwrap();
        assert_eq!(rsp, Ok(Response::ReadHoldingRegisters(vec![10, 11, 12])));
    }

    #[tokio::test]
    async fn unimplemented_function_yields_illegal_function() {
        let service = DeviceService::new(Arc::new(EchoDevice));
        let rsp = service.call(Request::ReadCoils(0, 1)).await.unwrap();
        assert_eq!(
            rsp,
            Err(ExceptionResponse {
                function: 0x01,
                exception: Exception::IllegalFunction,
            })
        );
    }

    #[test]
    fn unit_map_tracks_membership() {
        let mut map = UnitMap::empty();
        assert!(!map.contains(5));
        map.insert(5);
        assert!(map.contains(5));
        map.remove(5);
        assert!(!map.contains(5));
    }

    #[tokio::test]
    async fn read_coils_above_ceiling_yields_illegal_data_value() {
        let service = DeviceService::new(Arc::new(EchoDevice));
        let rsp = service
            .call(Request::ReadCoils(0, MAX_DISCRETE_QUANTITY + 1))
            .await
            .unwrap();
        assert_eq!(
            rsp,
            Err(ExceptionResponse {
                function: 0x01,
                exception: Exception::IllegalDataValue,
            })
        );
    }

    #[tokio::test]
    async fn read_holding_registers_above_ceiling_yields_illegal_data_value() {
        let service = DeviceService::new(Arc::new(EchoDevice));
        let rsp = service
            .call(Request::ReadHoldingRegisters(0, MAX_REGISTER_QUANTITY + 1))
            .await
            .unwrap();
        assert_eq!(
            rsp,
            Err(ExceptionResponse {
                function: 0x03,
                exception: Exception::IllegalDataValue,
            })
        );
    }

    #[test]
    fn unit_map_all_admits_every_id() {
        let map = UnitMap::all();
        assert!(map.contains(0));
        assert!(map.contains(247));
        assert!(map.contains(255));
        assert!(map.broadcast_enabled());
    }
}
