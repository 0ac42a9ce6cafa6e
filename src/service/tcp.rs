// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt,
    io::{Error, ErrorKind},
    sync::atomic::{AtomicU16, Ordering},
};

use bytes::BytesMut;
use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Encoder as _, Framed};

use crate::{
    codec,
    frame::{tcp::*, *},
    observer, slave::*,
};

const INITIAL_TRANSACTION_ID: TransactionId = 0;

/// Modbus TCP client
#[derive(Debug)]
pub(crate) struct Client<T> {
    framed: Framed<T, codec::tcp::ClientCodec>,
    unit_id: UnitId,
    transaction_id: AtomicU16,
    observer: observer::Hub,
    source: String,
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, slave: Slave) -> Self {
        let framed = Framed::new(transport, codec::tcp::ClientCodec::default());
        let unit_id: UnitId = slave.into();
        let transaction_id = AtomicU16::new(INITIAL_TRANSACTION_ID);
        let observer = observer::Hub::default();
        let source = "tcp".to_owned();
        observer.emit(observer::Event::Opened {
            source: source.clone(),
        });
        Self {
            framed,
            unit_id,
            transaction_id,
            observer,
            source,
        }
    }

    /// Subscribes to `tx`/`rx`/`error` events emitted while using this client.
    #[must_use]
    #[allow(dead_code)]
    pub(crate) fn subscribe(&self) -> tokio::sync::broadcast::Receiver<observer::Event> {
        self.observer.subscribe()
    }

    fn next_transaction_id(&self) -> TransactionId {
        let transaction_id = self.transaction_id.load(Ordering::Relaxed);
        self.transaction_id
            .store(transaction_id.wrapping_add(1), Ordering::Relaxed);
        transaction_id
    }

    fn next_request_hdr(&self, unit_id: UnitId) -> Header {
        let transaction_id = self.next_transaction_id();
        Header {
            transaction_id,
            unit_id,
        }
    }

    fn next_request_adu<R>(&self, req: R, disconnect: bool) -> RequestAdu
    where
        R: Into<RequestPdu>,
    {
        RequestAdu {
            hdr: self.next_request_hdr(self.unit_id),
            pdu: req.into(),
            disconnect,
        }
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response, Error> {
        log::debug!("Call {:?}", req);
        let disconnect = req == Request::Disconnect;
        let req_adu = self.next_request_adu(req, disconnect);
        let req_hdr = req_adu.hdr;

        self.framed.read_buffer_mut().clear();

        let tx_len = encoded_request_len(&req_adu);
        self.framed.send(req_adu).await.map_err(|err| {
            self.emit_error(&err);
            err
        })?;
        self.observer.emit(observer::Event::Tx {
            source: self.source.clone(),
            len: tx_len,
        });

        let res_adu = match self.framed.next().await {
            None => {
                let err = Error::last_os_error();
                self.emit_error(&err);
                return Err(err);
            }
            Some(Err(err)) => {
                self.emit_error(&err);
                return Err(err);
            }
            Some(Ok(res_adu)) => res_adu,
        };
        self.observer.emit(observer::Event::Rx {
            source: self.source.clone(),
            len: encoded_response_len(&res_adu),
        });

        match res_adu.pdu {
            ResponsePdu(Ok(res)) => verify_response_header(req_hdr, res_adu.hdr).and(Ok(res)),
            ResponsePdu(Err(err)) => Err(Error::new(ErrorKind::Other, err)),
        }
    }

    fn emit_error(&self, err: &Error) {
        self.observer.emit(observer::Event::Error {
            source: self.source.clone(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Measures the on-wire length of a request ADU for the `tx` signal, by
/// running it through the same encoder used to actually send it.
fn encoded_request_len(req_adu: &RequestAdu) -> usize {
    let mut buf = BytesMut::new();
    let mut codec = codec::tcp::ClientCodec::default();
    codec.encode(req_adu.clone(), &mut buf).map_or(0, |()| buf.len())
}

/// Measures the on-wire length of a response ADU for the `rx` signal, by
/// running it through the server-side encoder for the same wire format.
fn encoded_response_len(res_adu: &ResponseAdu) -> usize {
    let mut buf = BytesMut::new();
    let mut codec = codec::tcp::ServerCodec::default();
    codec.encode(res_adu.clone(), &mut buf).map_or(0, |()| buf.len())
}

fn verify_response_header(req_hdr: Header, rsp_hdr: Header) -> Result<(), Error> {
    if req_hdr != rsp_hdr {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!(
                "Invalid response header: expected/request = {req_hdr:?}, actual/response = {rsp_hdr:?}"
            ),
        ));
    }
    Ok(())
}

impl<T> SlaveContext for Client<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.unit_id = slave.into();
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for Client<T>
where
    T: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn call(&mut self, req: Request) -> Result<Response, Error> {
        Client::call(self, req).await
    }
}
