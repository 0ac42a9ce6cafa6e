// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU framing carried over a TCP transport, e.g. for a
//! serial-to-Ethernet gateway that multiplexes several RTU slave ids
//! onto one TCP connection.

use crate::{
    codec,
    config::{self, Settings},
    frame::*,
    observer,
    server::device::UnitMap,
    server::service::{NewService, Service},
};

use futures::{self, Future};
use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use log::trace;
use std::{
    io::{self, Error},
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

#[derive(Debug, Clone)]
pub struct Server {
    socket_addr: SocketAddr,
    max_connections: Option<usize>,
    observer: observer::Hub,
    unit_map: UnitMap,
}

/// Decrements the shared connection counter and emits
/// `ConnectionClosed` when a connection's task finishes, whichever way
/// it finishes.
struct ConnectionGuard {
    count: Arc<AtomicUsize>,
    observer: observer::Hub,
    peer: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
        self.observer.emit(observer::Event::ConnectionClosed {
            source: self.peer.clone(),
        });
    }
}

/// Tracks the accept loop's spawned per-connection tasks and aborts
/// whichever are still running when the accept loop itself is
/// cancelled, so a shutdown signal raced via `tokio::select!` against
/// `serve()` actually disconnects already-connected clients instead of
/// leaving their tasks running.
#[derive(Default)]
struct ConnectionRegistry(Vec<tokio::task::JoinHandle<()>>);

impl ConnectionRegistry {
    fn track(&mut self, handle: tokio::task::JoinHandle<()>) {
        self.0.retain(|h| !h.is_finished());
        self.0.push(handle);
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl Server {
    /// Set the address for the server (mandatory).
    #[must_use]
    pub fn new(socket_addr: SocketAddr) -> Self {
        Self {
            socket_addr,
            max_connections: None,
            observer: observer::Hub::default(),
            unit_map: UnitMap::all(),
        }
    }

    /// Limits the number of concurrently accepted TCP connections.
    /// Connections beyond this limit are accepted and then immediately
    /// dropped, rejecting the peer.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// Restricts the unit ids this server will respond to. Requests
    /// addressed to a unit id not in `unit_map` are silently dropped,
    /// same as a real gateway with nothing listening behind that id.
    #[must_use]
    pub fn with_unit_map(mut self, unit_map: UnitMap) -> Self {
        self.unit_map = unit_map;
        self
    }

    /// Subscribes to `new_connection`/`close_connection` lifecycle events.
    #[must_use]
    pub(crate) fn subscribe(&self) -> tokio::sync::broadcast::Receiver<observer::Event> {
        self.observer.subscribe()
    }

    /// Builds a server from a settings map, same keys and defaults as
    /// [`super::tcp::Server::from_settings`].
    pub(crate) fn from_settings(settings: &Settings) -> io::Result<Self> {
        let host = settings.get("host").unwrap_or("0.0.0.0");
        let port = settings.get_u16("port", config::defaults::PORT);
        let socket_addr: SocketAddr = format!("{host}:{port}").parse().map_err(|err| {
            Error::new(io::ErrorKind::InvalidInput, format!("invalid host/port: {err}"))
        })?;

        let max_connections =
            settings.get_usize("maxconn", config::defaults::MAX_CONNECTIONS);
        let mut unit_map = UnitMap::all();
        unit_map.set_broadcast_enabled(
            settings.get_bool("broadcastEnabled", config::defaults::BROADCAST_ENABLED),
        );

        Ok(Self::new(socket_addr)
            .with_max_connections(max_connections)
            .with_unit_map(unit_map))
    }

    /// Start an async Modbus RTU-over-TCP server task.
    pub async fn serve<S>(&self, service: S) -> Result<(), std::io::Error>
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        S::Request: From<Request>,
        S::Response: Into<ResponsePdu>,
        S::Error: Into<Error>,
        S::Instance: Send + Sync + 'static,
    {
        let service = Arc::new(service);
        let listener = TcpListener::bind(self.socket_addr).await?;
        let connection_count = Arc::new(AtomicUsize::new(0));
        let mut connections = ConnectionRegistry::default();

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let peer = peer_addr.to_string();

            if let Some(max_connections) = self.max_connections {
                if connection_count.load(Ordering::SeqCst) >= max_connections {
                    trace!("Rejecting connection from {peer}: maxconn reached");
                    drop(stream);
                    continue;
                }
            }
            connection_count.fetch_add(1, Ordering::SeqCst);
            self.observer
                .emit(observer::Event::NewConnection { source: peer.clone() });

            let framed = Framed::new(stream, codec::rtu::ServerCodec::default());
            let new_service = service.clone();
            let guard = ConnectionGuard {
                count: Arc::clone(&connection_count),
                observer: self.observer.clone(),
                peer,
            };

            let unit_map = self.unit_map.clone();
            let observer = self.observer.clone();
            let handle = tokio::spawn(Box::pin(async move {
                let _guard = guard;
                let service = new_service.new_service().unwrap();
                if let Err(err) = process(framed, service, unit_map, observer).await {
                    eprintln!("{err:?}");
                }
            }));
            connections.track(handle);
        }
    }

    /// Start a Modbus RTU-over-TCP server that blocks the current thread until a shutdown is requested
    pub fn serve_until<S, Sd>(self, service: S, shutdown_signal: Sd)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        Sd: Future<Output = ()> + Sync + Send + Unpin + 'static,
        S::Request: From<Request>,
        S::Response: Into<ResponsePdu>,
        S::Error: Into<Error>,
        S::Instance: Send + Sync + 'static,
    {
        let shutdown_signal = shutdown_signal.fuse();
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_io()
            .build()
            .unwrap();

        rt.block_on(async {
            tokio::select! {
                res = self.serve(service) => if let Err(e) = res { log::error!("error: {}", e) },
                _ = shutdown_signal => trace!("Shutdown signal received")
            }
        })
    }

    pub fn serve_forever<S>(self, service: S)
    where
        S: NewService<Request = Request, Response = Response> + Send + Sync + 'static,
        S::Request: From<Request>,
        S::Response: Into<ResponsePdu>,
        S::Error: Into<Error>,
        S::Instance: Send + Sync + 'static,
    {
        self.serve_until(service, futures::future::pending())
    }
}

/// The request-response loop spawned by serve for each accepted connection
async fn process<S>(
    mut framed: Framed<TcpStream, codec::rtu::ServerCodec>,
    service: S,
    unit_map: UnitMap,
    observer: observer::Hub,
) -> io::Result<()>
where
    S: Service<Request = Request> + Send + Sync + 'static,
    S::Response: Into<ResponsePdu>,
    S::Error: Into<Error>,
{
    let source = framed
        .get_ref()
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "rtu-over-tcp".to_owned());

    loop {
        let request = match framed.next().await {
            // Connection closed
            None => break,
            Some(request) => request,
        };
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                observer.emit(observer::Event::Error {
                    source: source.clone(),
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

        trace!("request for unit {unit_id}");
        observer.emit(observer::Event::RequestReceived {
            source: source.clone(),
        });
        let response = service.call(request.pdu.0).await.map_err(Into::into)?;

        // Per the Modbus spec, broadcast requests are processed but never answered.
        if is_broadcast {
            continue;
        }

        framed
            .send(rtu::ResponseAdu {
                hdr,
                pdu: response.into(),
            })
            .await?;
        observer.emit(observer::Event::ResponseSent {
            source: source.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_settings_applies_maxconn_and_broadcast() {
        let mut settings = Settings::new();
        settings.set("host", "127.0.0.1");
        settings.set("port", "1503");
        settings.set("maxconn", "2");
        settings.set("broadcastEnabled", "true");

        let server = Server::from_settings(&settings).unwrap();
        assert_eq!(server.socket_addr, "127.0.0.1:1503".parse().unwrap());
        assert_eq!(server.max_connections, Some(2));
        assert!(server.unit_map.broadcast_enabled());
    }
}
