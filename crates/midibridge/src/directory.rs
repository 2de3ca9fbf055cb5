use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::{Endpoint, MidiBackend};

/// Ordered list of endpoint names at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub names: Vec<String>,
}

/// Read-only view of the endpoints a backend currently exposes.
pub struct EndpointDirectory<B: MidiBackend> {
    backend: Arc<B>,
}

impl<B: MidiBackend> Clone for EndpointDirectory<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: MidiBackend> EndpointDirectory<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Enumerate the current endpoints.
    ///
    /// The result always has one entry per device, so positions line up with the
    /// index accepted by [`PortSession::connect`](crate::PortSession::connect).
    pub fn list(&self) -> Vec<Endpoint> {
        let count = self.backend.device_count();
        (0..count)
            .map(|index| Endpoint {
                index,
                display_name: self.backend.device_name(index),
            })
            .collect()
    }

    /// Current endpoint names, placeholders included.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            names: self.list().iter().map(Endpoint::label).collect(),
        }
    }

    /// Number of devices in the current enumeration.
    pub fn count(&self) -> usize {
        self.backend.device_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_backend::VirtualBackend;

    #[test]
    fn unnamed_devices_get_placeholders() {
        let backend = Arc::new(VirtualBackend::new());
        backend.add_device("Keystation 49");
        backend.add_unnamed_device();
        backend.add_device("nanoKEY2");

        let directory = EndpointDirectory::new(backend);
        let listed = directory.list();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[1].display_name, None);
        assert_eq!(
            directory.snapshot().names,
            vec!["Keystation 49", "MIDI Device 1", "nanoKEY2"]
        );
    }

    #[test]
    fn listing_is_stable_without_topology_change() {
        let backend = Arc::new(VirtualBackend::new());
        backend.add_device("A");
        backend.add_device("B");
        let directory = EndpointDirectory::new(Arc::clone(&backend));

        let first = directory.list();
        let second = directory.list();
        assert_eq!(first, second);
        assert_eq!(first.len(), backend.device_count());
    }

    #[test]
    fn empty_backend_lists_nothing() {
        let directory = EndpointDirectory::new(Arc::new(VirtualBackend::new()));
        assert!(directory.list().is_empty());
        assert_eq!(directory.snapshot(), ConnectionSnapshot::default());
    }
}
