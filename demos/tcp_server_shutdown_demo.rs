// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Demonstration that the TCP server stops accepting requests once its
//! shutdown signal fires.

use std::{future, net::SocketAddr, time::Duration};

use tokio::time::timeout;
use modbus_station::prelude::*;

#[derive(Clone)]
struct DemoService;

impl modbus_station::server::Service for DemoService {
    type Request = Request;
    type Response = Response;
    type Error = std::io::Error;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadInputRegisters(_addr, cnt) => {
                Response::ReadInputRegisters(vec![42; cnt as usize])
            }
            _ => unimplemented!(),
        };
        future::ready(Ok(res))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let socket_addr: SocketAddr = "127.0.0.1:5503".parse().unwrap();
    let (abort_tx, abort_rx) = tokio::sync::oneshot::channel::<()>();

    println!("Starting server on {socket_addr}");
    let server_task = tokio::spawn(async move {
        let server = modbus_station::server::tcp::Server::new(socket_addr);
        tokio::select! {
            res = server.serve(|| Ok(DemoService)) => {
                if let Err(err) = res {
                    eprintln!("server error: {err}");
                }
            }
            _ = abort_rx => println!("shutdown signal received"),
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("Connecting test client...");
    let mut client = tcp::connect(socket_addr).await?;
    let response = client.read_input_registers(0, 1).await?;
    println!("Initial request succeeded: {response:?}");

    println!("Sending shutdown signal...");
    abort_tx.send(()).unwrap();
    server_task.await?;

    println!("Requesting again after shutdown (should fail or time out)...");
    match timeout(Duration::from_millis(500), client.read_input_registers(0, 1)).await {
        Ok(Ok(response)) => println!("Unexpected success: {response:?}"),
        Ok(Err(err)) => println!("Failed as expected: {err}"),
        Err(_) => println!("Timed out as expected"),
    }

    Ok(())
}
