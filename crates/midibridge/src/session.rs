use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::decoder;
use crate::delivery::EventSender;
use crate::device::{Endpoint, EndpointClass, MidiBackend, PacketHandler};
use crate::error::{describe, ConnectError};

/// Default name registered with the native MIDI subsystem.
pub const DEFAULT_CLIENT_NAME: &str = "midibridge";
/// Default name of the input port.
pub const DEFAULT_PORT_NAME: &str = "midibridge-input";

/// Observable lifecycle of a [`PortSession`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing created yet.
    Uninitialized,
    /// Client registered, port not created.
    ClientReady,
    /// Port created, nothing connected.
    PortReady,
    /// Reading from an endpoint.
    Connected(Endpoint),
    /// Client or port creation failed; the session can no longer connect.
    Failed(ConnectError),
}

struct ActiveConnection<B: MidiBackend> {
    endpoint: Endpoint,
    handle: B::Endpoint,
    live: Arc<AtomicBool>,
    _connection: B::Connection,
}

impl<B: MidiBackend> Drop for ActiveConnection<B> {
    fn drop(&mut self) {
        // Cleared before the native connection is closed so late packets are discarded.
        self.live.store(false, Ordering::Release);
    }
}

struct SessionInner<B: MidiBackend> {
    client: Option<B::Client>,
    port: Option<B::Port>,
    active: Option<ActiveConnection<B>>,
    failure: Option<ConnectError>,
}

/// Connection from this process to at most one MIDI endpoint.
///
/// The native client and port are created on the first [`connect`](Self::connect)
/// and reused afterwards. All handle mutation goes through one lock, so `connect`
/// and `disconnect` may be called from any thread except the delivery context.
pub struct PortSession<B: MidiBackend> {
    backend: Arc<B>,
    sender: EventSender,
    client_name: String,
    port_name: String,
    inner: Mutex<SessionInner<B>>,
}

impl<B: MidiBackend> PortSession<B> {
    /// Create a session delivering decoded packets to `sender`.
    pub fn new(backend: Arc<B>, sender: EventSender) -> Self {
        Self {
            backend,
            sender,
            client_name: DEFAULT_CLIENT_NAME.into(),
            port_name: DEFAULT_PORT_NAME.into(),
            inner: Mutex::new(SessionInner {
                client: None,
                port: None,
                active: None,
                failure: None,
            }),
        }
    }

    /// Override the native client and port names.
    pub fn with_names(mut self, client: impl Into<String>, port: impl Into<String>) -> Self {
        self.client_name = client.into();
        self.port_name = port.into();
        self
    }

    /// Connect to the endpoint at `index`, replacing any current connection.
    ///
    /// The index is checked against the live device count. A source handle is
    /// preferred; a destination handle is used when the device exposes no source.
    /// On [`ConnectError::InvalidIndex`] and [`ConnectError::NoEndpoint`] an
    /// existing connection is left untouched. On [`ConnectError::ConnectFailed`]
    /// the previous connection has already been closed.
    pub fn connect(&self, index: usize) -> Result<(), ConnectError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(failure) = &inner.failure {
            return Err(failure.clone());
        }

        let count = self.backend.device_count();
        if index >= count {
            warn!(index, count, "MIDI device index out of range");
            return Err(ConnectError::InvalidIndex { index, count });
        }

        let handle = self
            .backend
            .resolve(EndpointClass::Source, index)
            .or_else(|| self.backend.resolve(EndpointClass::Destination, index))
            .ok_or(ConnectError::NoEndpoint { index })?;

        if let Some(active) = inner.active.as_mut() {
            if active.handle == handle {
                debug!(index, "MIDI endpoint already connected");
                active.endpoint = Endpoint {
                    index,
                    display_name: self.backend.device_name(index),
                };
                return Ok(());
            }
        }

        if let Some(previous) = inner.active.take() {
            info!(
                index = previous.endpoint.index,
                "disconnecting MIDI endpoint before reconnect"
            );
            drop(previous);
        }

        let port = match self.ensure_port(&mut inner.client, &mut inner.port) {
            Ok(port) => port,
            Err(err) => {
                warn!(error = %err, "MIDI session unusable");
                inner.failure = Some(err.clone());
                return Err(err);
            }
        };

        let endpoint = Endpoint {
            index,
            display_name: self.backend.device_name(index),
        };
        let live = Arc::new(AtomicBool::new(true));
        let handler = packet_handler(self.sender.clone(), Arc::clone(&live), index);
        let connection = self
            .backend
            .connect(port, &handle, handler)
            .map_err(|err| ConnectError::ConnectFailed {
                index,
                reason: describe(&err),
            })?;

        info!(index, name = %endpoint.label(), "connected MIDI endpoint");
        inner.active = Some(ActiveConnection {
            endpoint,
            handle,
            live,
            _connection: connection,
        });
        Ok(())
    }

    /// Close the current connection. Does nothing when nothing is connected.
    pub fn disconnect(&self) {
        let previous = self.inner.lock().active.take();
        if let Some(active) = previous {
            info!(index = active.endpoint.index, "disconnected MIDI endpoint");
        }
    }

    /// Endpoint currently read from, at its index in the current enumeration.
    ///
    /// A connection whose device has been unplugged is closed here.
    pub fn connected_endpoint(&self) -> Option<Endpoint> {
        let mut inner = self.inner.lock();
        let stale = self.refresh_active(&mut inner);
        let endpoint = inner.active.as_ref().map(|active| active.endpoint.clone());
        drop(inner);
        drop(stale);
        endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connected_endpoint().is_some()
    }

    pub fn state(&self) -> SessionState {
        let mut inner = self.inner.lock();
        if let Some(failure) = &inner.failure {
            return SessionState::Failed(failure.clone());
        }
        let stale = self.refresh_active(&mut inner);
        let state = match (&inner.client, &inner.port, &inner.active) {
            (_, _, Some(active)) => SessionState::Connected(active.endpoint.clone()),
            (_, Some(_), None) => SessionState::PortReady,
            (Some(_), None, None) => SessionState::ClientReady,
            (None, None, None) => SessionState::Uninitialized,
        };
        drop(inner);
        drop(stale);
        state
    }

    /// Re-find the connected handle in the current enumeration.
    ///
    /// Follows the handle to its new index, or takes the connection out when
    /// the device is gone. The caller drops the returned connection after
    /// releasing the lock.
    fn refresh_active(&self, inner: &mut SessionInner<B>) -> Option<ActiveConnection<B>> {
        let active = inner.active.as_mut()?;
        let found = (0..self.backend.device_count()).find(|&index| {
            [EndpointClass::Source, EndpointClass::Destination]
                .into_iter()
                .any(|class| self.backend.resolve(class, index).as_ref() == Some(&active.handle))
        });
        match found {
            Some(index) => {
                if index != active.endpoint.index {
                    debug!(from = active.endpoint.index, to = index, "MIDI endpoint moved");
                    active.endpoint = Endpoint {
                        index,
                        display_name: self.backend.device_name(index),
                    };
                }
                None
            }
            None => {
                info!(index = active.endpoint.index, "connected MIDI endpoint disappeared");
                inner.active.take()
            }
        }
    }

    fn ensure_port<'a>(
        &self,
        client: &mut Option<B::Client>,
        port: &'a mut Option<B::Port>,
    ) -> Result<&'a mut B::Port, ConnectError> {
        if port.is_none() {
            if client.is_none() {
                let created = self
                    .backend
                    .create_client(&self.client_name)
                    .map_err(|err| ConnectError::ClientInitFailed(describe(&err)))?;
                info!(client = %self.client_name, "created MIDI client");
                *client = Some(created);
            }
            if let Some(client) = client.as_ref() {
                let created = self
                    .backend
                    .create_port(client, &self.port_name)
                    .map_err(|err| ConnectError::PortInitFailed(describe(&err)))?;
                info!(port = %self.port_name, "created MIDI input port");
                *port = Some(created);
            }
        }
        port.as_mut()
            .ok_or_else(|| ConnectError::PortInitFailed("port unavailable".into()))
    }
}

impl<B: MidiBackend> Drop for PortSession<B> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn packet_handler(sender: EventSender, live: Arc<AtomicBool>, index: usize) -> PacketHandler {
    Box::new(move |packet| {
        if !live.load(Ordering::Acquire) {
            debug!(index, "dropping MIDI packet received after disconnect");
            return;
        }
        sender.send_message(decoder::decode(&packet));
    })
}
