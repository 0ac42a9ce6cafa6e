//! Combines a TCP server and an RTU server backed by the same in-memory
//! device. Exercise it locally with a virtual serial port pair:
//!   sudo socat -d -d pty,raw,nonblock,echo=0,link=/dev/tty-simu-server pty,raw,echo=0,link=/dev/tty-simu-client

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use modbus_station::{
    prelude::*,
    server::{device::DeviceService, tcp, Device},
};
use tokio_serial::SerialStream;

#[derive(Default)]
pub struct ExampleDevice {
    holding_registers: Mutex<HashMap<u16, u16>>,
    input_registers: Mutex<HashMap<u16, u16>>,
}

impl ExampleDevice {
    async fn restore(&self) {
        *self.input_registers.lock().await = HashMap::from([(0, 1234), (1, 5678)]);
        *self.holding_registers.lock().await =
            HashMap::from([(0, 10), (1, 20), (2, 30), (3, 40)]);
    }
}

#[async_trait]
impl Device for ExampleDevice {
    async fn read_input_registers(
        &self,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>, Exception> {
        let registers = self.input_registers.lock().await;
        (address..address + quantity)
            .map(|a| registers.get(&a).copied().ok_or(Exception::IllegalDataAddress))
            .collect()
    }

    async fn read_holding_registers(
        &self,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>, Exception> {
        let registers = self.holding_registers.lock().await;
        (address..address + quantity)
            .map(|a| registers.get(&a).copied().ok_or(Exception::IllegalDataAddress))
            .collect()
    }

    async fn write_multiple_registers(
        &self,
        address: Address,
        values: &[u16],
    ) -> Result<(), Exception> {
        let mut registers = self.holding_registers.lock().await;
        for (offset, value) in values.iter().enumerate() {
            let a = address + offset as u16;
            if !registers.contains_key(&a) {
                return Err(Exception::IllegalDataAddress);
            }
            registers.insert(a, *value);
        }
        Ok(())
    }
}

async fn client_execute(mut ctx: impl Reader + Writer, client_name: &str) {
    println!("{client_name}: Reading 2 input registers...");
    let response = ctx.read_input_registers(0x00, 2).await.unwrap();
    println!("{client_name}: The result is '{response:?}'");
    assert_eq!(response, [1234, 5678]);

    println!("{client_name}: Writing 2 holding registers...");
    ctx.write_multiple_registers(0x01, &[7777, 8888])
        .await
        .unwrap();

    println!("{client_name}: Reading 4 holding registers...");
    let response = ctx.read_holding_registers(0x00, 4).await.unwrap();
    println!("{client_name}: The result is '{response:?}'");
    assert_eq!(response, [10, 7777, 8888, 40]);

    println!("{client_name}: Reading nonexisting holding register address... (should fail)");
    let response = ctx.read_holding_registers(0x100, 1).await;
    assert!(response.is_err());

    println!("{client_name}: Done.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr: SocketAddr = "127.0.0.1:5502".parse().unwrap();
    let device = Arc::new(ExampleDevice::default());
    device.restore().await;

    let tcp_device = Arc::clone(&device);
    let tcp_handle = tokio::task::spawn(async move {
        let new_service = move || Ok(DeviceService::new(Arc::clone(&tcp_device)));
        tcp::Server::new(socket_addr).serve(new_service).await
    });

    let rtu_device = Arc::clone(&device);
    let rtu_handle = tokio::task::spawn(async move {
        let builder = tokio_serial::new("/dev/tty-simu-server", 19200);
        let serial = SerialStream::open(&builder).unwrap();
        let new_service = move || Ok(DeviceService::new(Arc::clone(&rtu_device)));
        modbus_station::server::rtu::Server::new(serial)
            .serve_forever(new_service)
            .await;
    });

    tokio::time::sleep(Duration::from_secs(1)).await;

    println!("TCP-client: Connecting client...");
    let tcp_ctx = tcp::connect(socket_addr).await?;
    client_execute(tcp_ctx, "TCP-client").await;
    device.restore().await;

    println!("RTU-client: Connecting client...");
    let builder = tokio_serial::new("/dev/tty-simu-client", 19200);
    let port = SerialStream::open(&builder)?;
    let rtu_ctx = rtu::attach_slave(port, Slave(0x17));
    client_execute(rtu_ctx, "RTU-client").await;

    tcp_handle.abort();
    rtu_handle.abort();

    Ok(())
}
