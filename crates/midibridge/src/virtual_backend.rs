//! In-memory backend used by tests and the CLI demo mode.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::device::{EndpointClass, MidiBackend, PacketHandler, RawPacket, TopologyHandler};
use crate::MidiTimestamp;

/// Endpoint handle of a virtual device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualEndpoint {
    pub device_id: u64,
    pub class: EndpointClass,
}

/// Description of a device to plug in.
#[derive(Clone, Debug)]
pub struct VirtualDeviceSpec {
    pub name: Option<String>,
    pub source: bool,
    pub destination: bool,
}

impl VirtualDeviceSpec {
    /// Named device exposing a source.
    pub fn source(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            source: true,
            destination: false,
        }
    }
}

struct VirtualDevice {
    id: u64,
    spec: VirtualDeviceSpec,
}

struct ActiveLink {
    id: u64,
    endpoint: VirtualEndpoint,
    handler: Arc<Mutex<PacketHandler>>,
}

type SharedTopologyHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Failures {
    client: bool,
    port: bool,
    connect: bool,
    watch: bool,
}

#[derive(Default)]
struct VirtualState {
    devices: Vec<VirtualDevice>,
    links: Vec<ActiveLink>,
    watchers: Vec<(u64, SharedTopologyHandler)>,
    failures: Failures,
    next_id: u64,
    client_names: Vec<String>,
    port_names: Vec<String>,
}

impl VirtualState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Backend whose devices, traffic and failures are driven by the caller.
///
/// Clones share the same devices, so a test can keep a handle after moving the
/// backend into a bridge.
#[derive(Clone)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
    epoch: Instant,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState::default())),
            epoch: Instant::now(),
        }
    }

    /// Plug in a named source device. Returns its index.
    pub fn add_device(&self, name: impl Into<String>) -> usize {
        self.plug(VirtualDeviceSpec::source(name))
    }

    /// Plug in a source device whose name cannot be resolved.
    pub fn add_unnamed_device(&self) -> usize {
        self.plug(VirtualDeviceSpec {
            name: None,
            source: true,
            destination: false,
        })
    }

    /// Plug in a device and fire a topology notification.
    pub fn plug(&self, spec: VirtualDeviceSpec) -> usize {
        let index = {
            let mut state = self.state.lock();
            let id = state.allocate_id();
            state.devices.push(VirtualDevice { id, spec });
            state.devices.len() - 1
        };
        self.notify_topology_change();
        index
    }

    /// Unplug the device at `index`, closing its links, and fire a notification.
    pub fn unplug(&self, index: usize) -> bool {
        let removed = {
            let mut state = self.state.lock();
            if index >= state.devices.len() {
                return false;
            }
            let device = state.devices.remove(index);
            state
                .links
                .retain(|link| link.endpoint.device_id != device.id);
            true
        };
        self.notify_topology_change();
        removed
    }

    /// Invoke every installed topology handler once.
    pub fn notify_topology_change(&self) {
        let watchers: Vec<SharedTopologyHandler> = self
            .state
            .lock()
            .watchers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in watchers {
            handler();
        }
    }

    /// Deliver `bytes` from the source of the device at `index`.
    ///
    /// Returns how many links received the packet.
    pub fn send(&self, index: usize, bytes: &[u8]) -> usize {
        let timestamp = self.epoch.elapsed().as_micros() as MidiTimestamp;
        let handlers: Vec<Arc<Mutex<PacketHandler>>> = {
            let state = self.state.lock();
            let Some(device) = state.devices.get(index) else {
                return 0;
            };
            let target = VirtualEndpoint {
                device_id: device.id,
                class: EndpointClass::Source,
            };
            state
                .links
                .iter()
                .filter(|link| link.endpoint == target)
                .map(|link| Arc::clone(&link.handler))
                .collect()
        };
        for handler in &handlers {
            let mut handler = handler.lock();
            (*handler)(RawPacket::new(bytes, timestamp));
        }
        handlers.len()
    }

    pub fn fail_client_creation(&self, fail: bool) {
        self.state.lock().failures.client = fail;
    }

    pub fn fail_port_creation(&self, fail: bool) {
        self.state.lock().failures.port = fail;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().failures.connect = fail;
    }

    pub fn fail_watch(&self, fail: bool) {
        self.state.lock().failures.watch = fail;
    }

    pub fn clients_created(&self) -> usize {
        self.state.lock().client_names.len()
    }

    pub fn ports_created(&self) -> usize {
        self.state.lock().port_names.len()
    }

    /// Names of the clients created so far, in order.
    pub fn client_names(&self) -> Vec<String> {
        self.state.lock().client_names.clone()
    }

    /// Names of the ports created so far, in order.
    pub fn port_names(&self) -> Vec<String> {
        self.state.lock().port_names.clone()
    }

    /// Number of open read links.
    pub fn active_links(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Number of installed topology handlers.
    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }
}

/// Client registration handed out by [`VirtualBackend`].
#[derive(Debug)]
pub struct VirtualClient {
    pub name: String,
}

/// Port handed out by [`VirtualBackend`].
#[derive(Debug)]
pub struct VirtualPort {
    pub name: String,
}

/// Open link; dropping it stops delivery.
pub struct VirtualConnection {
    id: u64,
    state: Weak<Mutex<VirtualState>>,
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.lock().links.retain(|link| link.id != self.id);
        }
    }
}

/// Installed notification; dropping it removes the handler.
pub struct VirtualWatch {
    id: u64,
    state: Weak<Mutex<VirtualState>>,
}

impl Drop for VirtualWatch {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.lock().watchers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl MidiBackend for VirtualBackend {
    type Endpoint = VirtualEndpoint;
    type Client = VirtualClient;
    type Port = VirtualPort;
    type Connection = VirtualConnection;
    type Watch = VirtualWatch;

    fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    fn device_name(&self, index: usize) -> Option<String> {
        self.state
            .lock()
            .devices
            .get(index)
            .and_then(|device| device.spec.name.clone())
    }

    fn resolve(&self, class: EndpointClass, index: usize) -> Option<VirtualEndpoint> {
        let state = self.state.lock();
        let device = state.devices.get(index)?;
        let exposed = match class {
            EndpointClass::Source => device.spec.source,
            EndpointClass::Destination => device.spec.destination,
        };
        exposed.then(|| VirtualEndpoint {
            device_id: device.id,
            class,
        })
    }

    fn create_client(&self, name: &str) -> anyhow::Result<VirtualClient> {
        let mut state = self.state.lock();
        if state.failures.client {
            anyhow::bail!("virtual client '{name}' rejected");
        }
        state.client_names.push(name.into());
        Ok(VirtualClient { name: name.into() })
    }

    fn create_port(&self, _client: &VirtualClient, name: &str) -> anyhow::Result<VirtualPort> {
        let mut state = self.state.lock();
        if state.failures.port {
            anyhow::bail!("virtual port '{name}' rejected");
        }
        state.port_names.push(name.into());
        Ok(VirtualPort { name: name.into() })
    }

    fn connect(
        &self,
        _port: &mut VirtualPort,
        endpoint: &VirtualEndpoint,
        handler: PacketHandler,
    ) -> anyhow::Result<VirtualConnection> {
        let mut state = self.state.lock();
        if state.failures.connect {
            anyhow::bail!("virtual connect rejected");
        }
        if !state.devices.iter().any(|d| d.id == endpoint.device_id) {
            anyhow::bail!("virtual device {} is gone", endpoint.device_id);
        }
        let id = state.allocate_id();
        state.links.push(ActiveLink {
            id,
            endpoint: endpoint.clone(),
            handler: Arc::new(Mutex::new(handler)),
        });
        Ok(VirtualConnection {
            id,
            state: Arc::downgrade(&self.state),
        })
    }

    fn watch_topology(&self, handler: TopologyHandler) -> anyhow::Result<VirtualWatch> {
        let mut state = self.state.lock();
        if state.failures.watch {
            anyhow::bail!("virtual notification channel unavailable");
        }
        let id = state.allocate_id();
        state.watchers.push((id, Arc::from(handler)));
        Ok(VirtualWatch {
            id,
            state: Arc::downgrade(&self.state),
        })
    }
}
