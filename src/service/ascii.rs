// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt,
    io::{Error, ErrorKind},
};

use bytes::BytesMut;
use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Encoder as _, Framed};

use crate::{
    codec,
    frame::{ascii::*, *},
    observer, slave::*,
};

/// Modbus ASCII client
#[derive(Debug)]
pub(crate) struct Client<T> {
    framed: Framed<T, codec::ascii::ClientCodec>,
    slave_id: SlaveId,
    observer: observer::Hub,
    source: String,
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, slave: Slave) -> Self {
        let framed = Framed::new(transport, codec::ascii::ClientCodec::default());
        let slave_id = slave.into();
        let observer = observer::Hub::default();
        let source = "ascii".to_owned();
        observer.emit(observer::Event::Opened {
            source: source.clone(),
        });
        Self {
            framed,
            slave_id,
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

    fn next_request_adu<R>(&self, req: R, disconnect: bool) -> RequestAdu
    where
        R: Into<RequestPdu>,
    {
        let slave_id = self.slave_id;
        let hdr = Header { slave_id };
        let pdu = req.into();
        RequestAdu {
            hdr,
            pdu,
            disconnect,
        }
    }

    async fn call(&mut self, req: Request) -> Result<Response, Error> {
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

        let res_adu = match self
            .framed
            .next()
            .await
            .unwrap_or_else(|| Err(Error::from(ErrorKind::BrokenPipe)))
        {
            Ok(res_adu) => res_adu,
            Err(err) => {
                self.emit_error(&err);
                return Err(err);
            }
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

fn encoded_request_len(req_adu: &RequestAdu) -> usize {
    let mut buf = BytesMut::new();
    let mut codec = codec::ascii::ClientCodec::default();
    codec.encode(req_adu.clone(), &mut buf).map_or(0, |()| buf.len())
}

fn encoded_response_len(res_adu: &ResponseAdu) -> usize {
    let mut buf = BytesMut::new();
    let mut codec = codec::ascii::ServerCodec::default();
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
        self.slave_id = slave.into();
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for Client<T>
where
    T: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn call(&mut self, req: Request) -> Result<Response, Error> {
        self.call(req).await
    }
}

#[cfg(test)]
mod tests {
    use core::{
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, Result};

    #[derive(Debug)]
    struct MockTransport;

    impl Unpin for MockTransport {}

    impl AsyncRead for MockTransport {
        fn poll_read(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &mut ReadBuf<'_>,
        ) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockTransport {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<Result<usize>> {
            Poll::Ready(Ok(2))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn handle_broken_pipe() {
        let transport = MockTransport;
        let mut client =
            crate::service::ascii::Client::new(transport, crate::service::ascii::Slave::broadcast());
        let res = client
            .call(crate::service::ascii::Request::ReadCoils(0x00, 5))
            .await;
        assert!(res.is_err());
        let err = res.err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
