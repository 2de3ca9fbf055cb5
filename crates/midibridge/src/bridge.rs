//! Collaborator-facing entry point tying the engine components together.

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::delivery::{self, EventReceiver, EventSender};
use crate::device::{Endpoint, MidiBackend};
use crate::directory::EndpointDirectory;
use crate::error::{ConnectError, InstallError};
use crate::hotplug::HotplugWatcher;
use crate::session::{PortSession, SessionState};

/// Device listing, one input connection and hotplug reporting over one backend.
///
/// Decoded messages and device snapshots arrive on the [`EventReceiver`]
/// returned by the constructor. Do not call the connect methods from the thread
/// draining that receiver.
pub struct MidiDeviceBridge<B: MidiBackend> {
    directory: EndpointDirectory<B>,
    session: PortSession<B>,
    hotplug: HotplugWatcher<B>,
    sender: EventSender,
}

impl<B: MidiBackend> MidiDeviceBridge<B> {
    pub fn new(backend: B) -> (Self, EventReceiver) {
        Self::with_config(backend, &BridgeConfig::default())
    }

    /// Build a bridge using the client and port names from `config`.
    pub fn with_config(backend: B, config: &BridgeConfig) -> (Self, EventReceiver) {
        let backend = Arc::new(backend);
        let (sender, receiver) = delivery::channel();
        let session = PortSession::new(Arc::clone(&backend), sender.clone())
            .with_names(config.client_name.clone(), config.port_name.clone());
        let bridge = Self {
            directory: EndpointDirectory::new(Arc::clone(&backend)),
            session,
            hotplug: HotplugWatcher::new(backend),
            sender,
        };
        (bridge, receiver)
    }

    /// Device names, index-aligned with [`open_device`](Self::open_device).
    pub fn list_devices(&self) -> Vec<String> {
        self.directory.snapshot().names
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.directory.list()
    }

    /// Start reading from the device at `index`.
    pub fn open_device(&self, index: usize) -> Result<(), ConnectError> {
        self.session.connect(index)
    }

    /// Open the first device whose name contains `name`, ignoring case.
    pub fn open_device_by_name(&self, name: &str) -> Result<Endpoint, ConnectError> {
        let needle = name.trim().to_lowercase();
        let endpoint = self
            .directory
            .list()
            .into_iter()
            .find(|endpoint| endpoint.label().to_lowercase().contains(&needle))
            .ok_or_else(|| ConnectError::UnknownDevice { name: name.into() })?;
        self.session.connect(endpoint.index)?;
        Ok(endpoint)
    }

    pub fn close_device(&self) {
        self.session.disconnect();
    }

    pub fn connected_device(&self) -> Option<Endpoint> {
        self.session.connected_endpoint()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Report device list changes on the event channel.
    pub fn start_hotplug_watch(&self) -> Result<(), InstallError> {
        let sender = self.sender.clone();
        self.hotplug.install(move |snapshot| {
            sender.send_snapshot(snapshot);
        })
    }

    pub fn stop_hotplug_watch(&self) {
        self.hotplug.uninstall();
    }
}

#[cfg(feature = "midir-backend")]
impl MidiDeviceBridge<crate::backend_midir::MidirBackend> {
    /// Bridge over the system MIDI subsystem.
    pub fn system(config: &BridgeConfig) -> (Self, EventReceiver) {
        tracing::info!(client = %config.client_name, "starting midi bridge");
        let backend = crate::backend_midir::MidirBackend::new(config.hotplug_poll_interval());
        Self::with_config(backend, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::BridgeEvent;
    use crate::virtual_backend::VirtualBackend;

    #[test]
    fn opens_device_by_partial_name() {
        let backend = VirtualBackend::new();
        backend.add_device("Arturia KeyStep");
        backend.add_device("Akai MPK mini");
        let (bridge, _rx) = MidiDeviceBridge::new(backend);

        let endpoint = bridge.open_device_by_name("mpk").unwrap();
        assert_eq!(endpoint.index, 1);
        assert_eq!(bridge.connected_device(), Some(endpoint));

        let err = bridge.open_device_by_name("launchpad").unwrap_err();
        assert_eq!(
            err,
            ConnectError::UnknownDevice {
                name: "launchpad".into()
            }
        );
        assert_eq!(bridge.connected_device().map(|e| e.index), Some(1));
    }

    #[test]
    fn configured_names_reach_backend() {
        let config = BridgeConfig {
            client_name: "stage".into(),
            port_name: "stage-in".into(),
            ..BridgeConfig::default()
        };
        let backend = VirtualBackend::new();
        backend.add_device("Keys");
        let (bridge, _rx) = MidiDeviceBridge::with_config(backend.clone(), &config);
        bridge.open_device(0).unwrap();
        assert!(matches!(bridge.session_state(), SessionState::Connected(_)));
        assert_eq!(backend.client_names(), vec!["stage".to_string()]);
        assert_eq!(backend.port_names(), vec!["stage-in".to_string()]);
    }

    #[test]
    fn stop_hotplug_watch_silences_snapshots() {
        let backend = VirtualBackend::new();
        let (bridge, rx) = MidiDeviceBridge::new(backend.clone());
        bridge.start_hotplug_watch().unwrap();
        backend.add_device("Keys");
        assert_eq!(
            rx.try_recv(),
            Some(BridgeEvent::Devices(crate::ConnectionSnapshot {
                names: vec!["Keys".into()]
            }))
        );

        bridge.stop_hotplug_watch();
        backend.add_device("Pads");
        assert!(rx.try_recv().is_none());
        assert_eq!(bridge.list_devices(), vec!["Keys", "Pads"]);
    }
}
