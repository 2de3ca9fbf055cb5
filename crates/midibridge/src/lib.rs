//! MIDI device I/O engine: endpoint discovery, a single input connection,
//! note decoding and hotplug reporting.
//!
//! Native callbacks run on driver-owned threads. Everything they produce is
//! funnelled through [`EventReceiver`], and the thread draining it is the only
//! place the consumer observes events.

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod device;
pub mod directory;
pub mod error;
pub mod hotplug;
pub mod session;
pub mod virtual_backend;

#[cfg(feature = "midir-backend")]
pub mod backend_midir;

/// Driver timestamp in microseconds.
pub type MidiTimestamp = u64;

pub use bridge::MidiDeviceBridge;
pub use config::BridgeConfig;
pub use decoder::{decode, decode_bytes, MidiEvent, MidiEventKind};
pub use delivery::{BridgeEvent, EventReceiver, EventSender, CONNECTION_EVENT, MESSAGE_EVENT};
pub use device::{Endpoint, EndpointClass, MidiBackend, PacketHandler, RawPacket, TopologyHandler};
pub use directory::{ConnectionSnapshot, EndpointDirectory};
pub use error::{ConnectError, InstallError};
pub use hotplug::HotplugWatcher;
pub use session::{PortSession, SessionState};
pub use virtual_backend::{VirtualBackend, VirtualDeviceSpec};

#[cfg(feature = "midir-backend")]
pub use backend_midir::MidirBackend;
