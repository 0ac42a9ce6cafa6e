// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::future;

use modbus_station::{
    client::Context,
    prelude::{Exception, ExceptionResponse, Reader as _, Request, Response, Writer as _},
    server::Service,
};

pub struct TestService {}

impl TestService {
    fn handle(&self, req: Request) -> Result<Response, ExceptionResponse> {
        use Request::*;

        let function = req.function_code();
        let exception = match req {
            ReadCoils(_, _) => Exception::Acknowledge,
            ReadDiscreteInputs(_, _) => Exception::GatewayPathUnavailable,
            WriteSingleCoil(_, _) => Exception::GatewayTargetDevice,
            WriteMultipleCoils(_, _) => Exception::IllegalDataAddress,
            ReadInputRegisters(_, _) => Exception::IllegalDataValue,
            ReadHoldingRegisters(_, _) => Exception::IllegalFunction,
            WriteSingleRegister(_, _) => Exception::MemoryParityError,
            WriteMultipleRegisters(_, _) => Exception::ServerDeviceBusy,
            MaskWriteRegister(_, _, _) => Exception::ServerDeviceFailure,
            _ => Exception::IllegalFunction,
        };
        Err(ExceptionResponse { function, exception })
    }
}

impl Service for TestService {
    type Request = Request;
    type Response = Result<Response, ExceptionResponse>;
    type Error = std::io::Error;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(Ok(self.handle(req)))
    }
}

fn assert_exception(err: std::io::Error, exception: Exception) {
    assert_eq!(err.kind(), std::io::ErrorKind::Other);
    assert!(
        err.to_string().contains(&exception.to_string()),
        "expected {exception:?} in error message, got: {err}"
    );
}

pub async fn check_client_context(mut ctx: Context) {
    let err = ctx.read_coils(0x00, 2).await.unwrap_err();
    assert_exception(err, Exception::Acknowledge);

    let err = ctx.read_discrete_inputs(0x00, 2).await.unwrap_err();
    assert_exception(err, Exception::GatewayPathUnavailable);

    let err = ctx.write_single_coil(0x00, true).await.unwrap_err();
    assert_exception(err, Exception::GatewayTargetDevice);

    let err = ctx.write_multiple_coils(0x00, &[true]).await.unwrap_err();
    assert_exception(err, Exception::IllegalDataAddress);

    let err = ctx.read_input_registers(0x00, 2).await.unwrap_err();
    assert_exception(err, Exception::IllegalDataValue);

    let err = ctx.read_holding_registers(0x00, 2).await.unwrap_err();
    assert_exception(err, Exception::IllegalFunction);

    let err = ctx.write_single_register(0x00, 42).await.unwrap_err();
    assert_exception(err, Exception::MemoryParityError);

    let err = ctx
        .write_multiple_registers(0x00, &[42])
        .await
        .unwrap_err();
    assert_exception(err, Exception::ServerDeviceBusy);

    let err = ctx.mask_write_register(0x00, 0, 0).await.unwrap_err();
    assert_exception(err, Exception::ServerDeviceFailure);

    let err = ctx
        .read_write_multiple_registers(0x00, 0, 0, &[42])
        .await
        .unwrap_err();
    assert_exception(err, Exception::IllegalFunction);
}
