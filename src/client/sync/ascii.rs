// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Context, Result};

use tokio_serial::{SerialPortBuilder, SerialStream};

use crate::client::ascii::attach_slave as async_attach_slave;
use crate::slave::Slave;

/// Connect to no particular Modbus slave device for sending
/// broadcast messages.
pub fn connect(builder: &SerialPortBuilder) -> Result<Context> {
    connect_slave(builder, Slave::broadcast())
}

/// Connect to any kind of Modbus slave device.
pub fn connect_slave(builder: &SerialPortBuilder, slave: Slave) -> Result<Context> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    let serial = runtime.block_on(async { SerialStream::open(builder) })?;
    let async_ctx = async_attach_slave(serial, slave);
    Ok(Context {
        runtime,
        async_ctx,
        timeout: None,
    })
}
