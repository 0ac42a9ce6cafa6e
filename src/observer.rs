// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signal/slot style notifications for port and listener lifecycle
//! events, realized as a thin wrapper around [`tokio::sync::broadcast`].
//!
//! Each [`Hub`] owns one sender; any number of observers can
//! [`Hub::subscribe`] and later drop their [`Receiver`] to unsubscribe
//! without perturbing other subscribers, satisfying the re-entrancy
//! expectations of a signal/slot callback registry.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// A lifecycle event raised by a port or listener, identifying the
/// source (port name, peer address, ...) that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    /// A transport was opened successfully.
    Opened { source: String },
    /// A transport was closed, either by request or due to an error.
    Closed { source: String },
    /// A new inbound TCP connection was accepted.
    NewConnection { source: String },
    /// An inbound TCP connection was closed.
    ConnectionClosed { source: String },
    /// A request was received and is about to be dispatched.
    RequestReceived { source: String },
    /// A response (or exception) was sent back to the caller.
    ResponseSent { source: String },
    /// A frame was written to the underlying transport.
    Tx { source: String, len: usize },
    /// A frame was read from the underlying transport.
    Rx { source: String, len: usize },
    /// An error occurred that does not fit one of the other kinds, e.g. a
    /// framing (CRC/LRC) failure. Carries the `std::io::ErrorKind` the
    /// error was raised with alongside a human-readable message.
    Error {
        source: String,
        kind: std::io::ErrorKind,
        message: String,
    },
}

/// A broadcast hub for [`Event`]s raised by a single port or listener.
#[derive(Debug, Clone)]
pub(crate) struct Hub {
    sender: broadcast::Sender<Event>,
}

impl Default for Hub {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl Hub {
    /// Subscribes to future events. Past events are not replayed.
    #[must_use]
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emits an event to all current subscribers.
    ///
    /// Broadcasting with no subscribers is not an error: the event is
    /// simply dropped, the same as a signal with no connected slots.
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let hub = Hub::default();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.emit(Event::Opened {
            source: "rtu:/dev/ttyUSB0".into(),
        });

        assert_eq!(
            rx1.recv().await.unwrap(),
            Event::Opened {
                source: "rtu:/dev/ttyUSB0".into()
            }
        );
        assert_eq!(
            rx2.recv().await.unwrap(),
            Event::Opened {
                source: "rtu:/dev/ttyUSB0".into()
            }
        );
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let hub = Hub::default();
        hub.emit(Event::ConnectionClosed {
            source: "127.0.0.1:502".into(),
        });
    }

    #[tokio::test]
    async fn dropping_one_receiver_does_not_affect_others() {
        let hub = Hub::default();
        let rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        drop(rx1);

        hub.emit(Event::NewConnection {
            source: "127.0.0.1:51234".into(),
        });
        assert!(rx2.recv().await.is_ok());
    }
}
