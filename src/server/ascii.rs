// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus ASCII server skeleton

use crate::{
    codec,
    config::{self, Settings},
    frame::*,
    observer,
    server::device::UnitMap,
    server::service::{NewService, Service},
};
use futures::{select, Future, FutureExt as _};
use futures_util::{SinkExt as _, StreamExt as _};
use std::{io::Error, path::Path};
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};
use tokio_util::codec::Framed;

#[derive(Debug)]
pub struct Server {
    serial: SerialStream,
    unit_map: UnitMap,
    observer: observer::Hub,
}

impl Server {
    /// set up a new Server instance from an interface path and baud rate
    pub fn new_from_path<P: AsRef<Path>>(p: P, baud_rate: u32) -> Result<Self, Error> {
        let serial =
            SerialStream::open(&tokio_serial::new(p.as_ref().to_string_lossy(), baud_rate))?;
        Ok(Self::new(serial))
    }

    /// set up a new Server instance based on a pre-configured SerialStream instance
    #[must_use]
    pub fn new(serial: SerialStream) -> Self {
        Server {
            serial,
            unit_map: UnitMap::all(),
            observer: observer::Hub::default(),
        }
    }

    /// Restricts the unit ids this server will respond to.
    #[must_use]
    pub fn with_unit_map(mut self, unit_map: UnitMap) -> Self {
        self.unit_map = unit_map;
        self
    }

    /// Subscribes to lifecycle events emitted while serving requests.
    #[must_use]
    pub(crate) fn subscribe(&self) -> tokio::sync::broadcast::Receiver<observer::Event> {
        self.observer.subscribe()
    }

    /// Opens the serial port described by a settings map:
    /// `serialPortName`, `baudRate`, `dataBits`, `stopBits`, `parity`,
    /// `flowControl`, falling back to [`config::defaults`] for keys the
    /// map doesn't provide.
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, Error> {
        let path = settings
            .get("serialPortName")
            .ok_or_else(|| Error::new(std::io::ErrorKind::InvalidInput, "missing serialPortName"))?;
        let baud_rate = settings.get_u32("baudRate", config::defaults::BAUD_RATE);
        let data_bits = match settings.get_u16("dataBits", u16::from(config::defaults::DATA_BITS)) {
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match settings.get_u16("stopBits", u16::from(config::defaults::STOP_BITS)) {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let parity = match settings.get("parity").unwrap_or(config::defaults::PARITY) {
            "odd" => Parity::Odd,
            "none" => Parity::None,
            _ => Parity::Even,
        };
        let flow_control = match settings
            .get("flowControl")
            .unwrap_or(config::defaults::FLOW_CONTROL)
        {
            "hardware" => FlowControl::Hardware,
            "software" => FlowControl::Software,
            _ => FlowControl::None,
        };

        let builder = tokio_serial::new(path, baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control);
        let serial = SerialStream::open(&builder)?;
        Ok(Self::new(serial))
    }

    /// serve Modbus ASCII requests based on the provided service until it finishes
    pub async fn serve_forever<S>(self, new_service: S)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        S::Error: Into<Error>,
        S::Instance: 'static + Send + Sync,
    {
        self.serve_until(new_service, futures::future::pending())
            .await;
    }

    /// serve Modbus ASCII requests based on the provided service until it finishes or a shutdown signal is received
    pub async fn serve_until<S, Sd>(self, new_service: S, shutdown_signal: Sd)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        Sd: Future<Output = ()> + Sync + Send + Unpin + 'static,
        S::Request: From<Request>,
        S::Response: Into<ResponsePdu>,
        S::Error: Into<Error>,
        S::Instance: Send + Sync + 'static,
    {
        self.observer.emit(observer::Event::Opened {
            source: "ascii".to_owned(),
        });
        let framed = Framed::new(self.serial, codec::ascii::ServerCodec::default());
        let service = new_service.new_service().unwrap();
        let future = process(framed, service, self.unit_map, self.observer.clone());

        let mut server = Box::pin(future).fuse();
        let mut shutdown = shutdown_signal.fuse();

        async {
            select! {
                res = server => if let Err(e) = res {
                    println!("error: {e}");
                },
                _ = shutdown => println!("Shutdown signal received")
            }
        }
        .await;
    }
}

/// frame wrapper around the underlying service's responses to forwarded requests
async fn process<S>(
    mut framed: Framed<SerialStream, codec::ascii::ServerCodec>,
    service: S,
    unit_map: UnitMap,
    observer: observer::Hub,
) -> Result<(), Error>
where
    S: Service<Request = Request> + Send + Sync + 'static,
    S::Response: Into<ResponsePdu>,
    S::Error: Into<Error>,
{
    loop {
        let request = match framed.next().await {
            // Stream is exhausted
            None => break,
            Some(request) => request,
        };
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                observer.emit(observer::Event::Error {
                    source: "ascii".to_owned(),
                    kind: err.kind(),
                    message: err.to_string(),
                });
                continue;
            }
        };

        let hdr = request.hdr;
        let unit_id = hdr.slave_id;
        let is_broadcast = unit_id == 0;

        if !is_broadcast && !unit_map.contains(unit_id) {
            continue;
        }
        if is_broadcast && !unit_map.broadcast_enabled() {
            continue;
        }

        observer.emit(observer::Event::RequestReceived {
            source: format!("unit {unit_id}"),
        });
        let response = service.call(request.pdu.0).await.map_err(Into::into)?;

        if is_broadcast {
            continue;
        }

        framed
            .send(ascii::ResponseAdu {
                hdr,
                pdu: response.into(),
            })
            .await?;
        observer.emit(observer::Event::ResponseSent {
            source: format!("unit {unit_id}"),
        });
    }
    Ok(())
}
