// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test repeated writes to holding registers with the TCP client and TCP
//! server, guarding against a buffer/task leak across many iterations.

#![cfg(feature = "tcp-server")]

use std::{future, net::SocketAddr, time::Duration};

use modbus_station::{client, prelude::*, server::tcp::Server};

#[derive(Clone)]
struct WriteService;

impl modbus_station::server::Service for WriteService {
    type Request = Request;
    type Response = Response;
    type Error = std::io::Error;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::WriteMultipleRegisters(addr, values) => {
                Response::WriteMultipleRegisters(addr, values.len() as u16)
            }
            _ => unimplemented!(),
        };
        future::ready(Ok(res))
    }
}

#[tokio::test]
async fn tcp_issue301_write_test() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr: SocketAddr = "127.0.0.1:5506".parse().unwrap();

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(10000)) => panic!("timeout - perhaps we have a lockup or a thread was killed"),
        r = server_context(socket_addr) => r?,
        r = client_context(socket_addr) => r?,
    }

    Ok(())
}

async fn server_context(socket_addr: SocketAddr) -> anyhow::Result<()> {
    println!("Starting up server on {socket_addr}");
    Server::new(socket_addr).serve(|| Ok(WriteService)).await?;
    Ok(())
}

async fn client_context(socket_addr: SocketAddr) -> anyhow::Result<()> {
    // Give the server some time for starting up
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut ctx = client::tcp::connect(socket_addr).await?;

    let max_iterations = 1000;
    let mut iterations = 1;
    loop {
        println!("iteration {iterations}");
        ctx.write_multiple_registers(0x1000, &[1]).await?;
        ctx.write_multiple_registers(0x1000, &[1, 2]).await?;

        if iterations == max_iterations {
            return Ok(());
        }

        iterations += 1;
    }
}
