// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test to demonstrate that TCP server properly disconnects clients when cancelled

#![cfg(feature = "tcp-server")]

use std::{future, net::SocketAddr, time::Duration};

use tokio::time::timeout;
use modbus_station::{
    prelude::*,
    server::tcp::Server,
};

#[derive(Clone)]
struct TestService;

impl modbus_station::server::Service for TestService {
    type Request = Request;
    type Response = Response;
    type Error = std::io::Error;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadInputRegisters(_addr, cnt) => {
                Response::ReadInputRegisters(vec![0; cnt as usize])
            }
            _ => unimplemented!(),
        };
        future::ready(Ok(res))
    }
}

#[tokio::test]
async fn test_server_shutdown_disconnects_clients() {
    let socket_addr: SocketAddr = "127.0.0.1:5504".parse().unwrap();
    let (abort_tx, abort_rx) = tokio::sync::oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        let server = Server::new(socket_addr);
        tokio::select! {
            res = server.serve(|| Ok(TestService)) => res,
            _ = abort_rx => Ok(()),
        }
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Connect a client
    let mut client = modbus_station::client::tcp::connect(socket_addr)
        .await
        .unwrap();

    // Verify client connection works
    let response = client.read_input_registers(0, 1).await.unwrap();
    assert_eq!(response, vec![0]);

    // Send abort signal to server
    abort_tx.send(()).unwrap();

    // Wait for server to shut down
    let result = timeout(Duration::from_secs(2), server_task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    // Give a moment for connections to close
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Try to use the client again - this should fail because the connection should be closed
    let client_result = timeout(
        Duration::from_millis(500),
        client.read_input_registers(0, 1),
    )
    .await;

    // The client should either time out or get a connection error
    assert!(client_result.is_err() || client_result.unwrap().is_err());
}
