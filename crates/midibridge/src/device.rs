use serde::{Deserialize, Serialize};

use crate::MidiTimestamp;

/// One MIDI source or destination as reported by the most recent enumeration.
///
/// Identity is positional: the same index may name a different device after a
/// topology change, so an `Endpoint` is only meaningful next to the listing that
/// produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Position in the enumeration.
    pub index: usize,
    /// Name reported by the backend, if it could be resolved.
    pub display_name: Option<String>,
}

impl Endpoint {
    /// Name to show to users, with a stable placeholder for unnamed devices.
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| placeholder_name(self.index))
    }
}

/// Placeholder used when a device name cannot be resolved.
pub fn placeholder_name(index: usize) -> String {
    format!("MIDI Device {index}")
}

/// Which native enumeration an endpoint handle came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointClass {
    /// Endpoint that produces MIDI data for us to read.
    Source,
    /// Endpoint that consumes MIDI data.
    Destination,
}

/// One native MIDI packet, borrowed from the driver for the duration of a callback.
#[derive(Clone, Copy, Debug)]
pub struct RawPacket<'a> {
    data: &'a [u8],
    offset: usize,
    count: usize,
    /// Driver timestamp in microseconds.
    pub timestamp: MidiTimestamp,
}

impl<'a> RawPacket<'a> {
    /// Packet covering the whole buffer.
    pub fn new(bytes: &'a [u8], timestamp: MidiTimestamp) -> Self {
        Self {
            data: bytes,
            offset: 0,
            count: bytes.len(),
            timestamp,
        }
    }

    /// Packet covering `count` bytes of `buffer` starting at `offset`.
    ///
    /// Some drivers reuse a larger receive buffer and hand over a window into it.
    /// The window is clamped to the buffer.
    pub fn windowed(
        buffer: &'a [u8],
        offset: usize,
        count: usize,
        timestamp: MidiTimestamp,
    ) -> Self {
        let offset = offset.min(buffer.len());
        let count = count.min(buffer.len() - offset);
        Self {
            data: buffer,
            offset,
            count,
            timestamp,
        }
    }

    /// Bytes belonging to this packet.
    pub fn bytes(&self) -> &'a [u8] {
        &self.data[self.offset..self.offset + self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Callback invoked by a backend for every packet read from a connected endpoint.
///
/// Runs on a driver-owned thread.
pub type PacketHandler = Box<dyn FnMut(RawPacket<'_>) + Send + 'static>;

/// Callback invoked by a backend whenever the device topology changes.
pub type TopologyHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// Backend abstraction over a platform MIDI subsystem.
///
/// Handles are owned values: dropping a `Connection` closes it and dropping a
/// `Watch` removes the topology notification.
pub trait MidiBackend: Send + Sync + 'static {
    /// Resolved endpoint handle.
    type Endpoint: Clone + PartialEq + Send + 'static;
    /// Native client registration.
    type Client: Send + 'static;
    /// Native input port owned by a client.
    type Port: Send + 'static;
    /// Live read connection between a port and an endpoint.
    type Connection: Send + 'static;
    /// Installed topology notification.
    type Watch: Send + 'static;

    /// Number of devices in the current enumeration.
    fn device_count(&self) -> usize;

    /// Display name of the device at `index`, if resolvable.
    fn device_name(&self, index: usize) -> Option<String>;

    /// Resolve a handle for `index` in the given enumeration.
    fn resolve(&self, class: EndpointClass, index: usize) -> Option<Self::Endpoint>;

    /// Register a native client.
    fn create_client(&self, name: &str) -> anyhow::Result<Self::Client>;

    /// Create an input port on `client`.
    fn create_port(&self, client: &Self::Client, name: &str) -> anyhow::Result<Self::Port>;

    /// Start reading from `endpoint` through `port`.
    fn connect(
        &self,
        port: &mut Self::Port,
        endpoint: &Self::Endpoint,
        handler: PacketHandler,
    ) -> anyhow::Result<Self::Connection>;

    /// Install a topology change notification.
    fn watch_topology(&self, handler: TopologyHandler) -> anyhow::Result<Self::Watch>;
}
