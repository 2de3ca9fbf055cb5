use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use midir::{
    Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection,
    MidiOutputPort,
};
use tracing::{debug, warn};

use crate::device::{EndpointClass, MidiBackend, PacketHandler, RawPacket, TopologyHandler};

/// Interval between port list polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const PROBE_CLIENT: &str = "midibridge-probe";

/// Endpoint handle resolved through midir.
#[derive(Clone, PartialEq)]
pub enum MidirEndpoint {
    Source(MidiInputPort),
    Destination(MidiOutputPort),
}

/// Client registration. midir binds clients to connections, so this keeps the name.
pub struct MidirClient {
    name: String,
}

pub struct MidirPort {
    client_name: String,
    port_name: String,
}

/// Open midir connection; dropping it closes the native port.
pub enum MidirConnection {
    Input(MidiInputConnection<()>),
    /// Destinations cannot be read from; the connection only keeps the device open.
    Output(MidiOutputConnection),
}

/// Backend implemented using the `midir` crate.
///
/// Index `i` selects input port `i`, or output port `i` when there is no input
/// port at `i`. Output ports only resolve as destinations.
pub struct MidirBackend {
    poll_interval: Duration,
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl MidirBackend {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn probe_input() -> Option<MidiInput> {
        match MidiInput::new(PROBE_CLIENT) {
            Ok(input) => Some(input),
            Err(err) => {
                warn!(%err, "failed to initialise midir input for enumeration");
                None
            }
        }
    }

    fn probe_output() -> Option<MidiOutput> {
        match MidiOutput::new(PROBE_CLIENT) {
            Ok(output) => Some(output),
            Err(err) => {
                warn!(%err, "failed to initialise midir output for enumeration");
                None
            }
        }
    }
}

/// Input and output port names, in enumeration order.
type PortNames = (Vec<String>, Vec<String>);

fn port_names() -> PortNames {
    let inputs = MidirBackend::probe_input()
        .map(|input| {
            input
                .ports()
                .iter()
                .map(|port| input.port_name(port).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    let outputs = MidirBackend::probe_output()
        .map(|output| {
            output
                .ports()
                .iter()
                .map(|port| output.port_name(port).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    (inputs, outputs)
}

impl MidiBackend for MidirBackend {
    type Endpoint = MidirEndpoint;
    type Client = MidirClient;
    type Port = MidirPort;
    type Connection = MidirConnection;
    type Watch = MidirWatch;

    fn device_count(&self) -> usize {
        let inputs = Self::probe_input().map_or(0, |input| input.port_count());
        let outputs = Self::probe_output().map_or(0, |output| output.port_count());
        inputs.max(outputs)
    }

    fn device_name(&self, index: usize) -> Option<String> {
        if let Some(input) = Self::probe_input() {
            if let Some(port) = input.ports().get(index) {
                return input.port_name(port).ok();
            }
        }
        let output = Self::probe_output()?;
        let ports = output.ports();
        let port = ports.get(index)?;
        output.port_name(port).ok()
    }

    fn resolve(&self, class: EndpointClass, index: usize) -> Option<MidirEndpoint> {
        match class {
            EndpointClass::Source => Self::probe_input()?
                .ports()
                .get(index)
                .cloned()
                .map(MidirEndpoint::Source),
            EndpointClass::Destination => Self::probe_output()?
                .ports()
                .get(index)
                .cloned()
                .map(MidirEndpoint::Destination),
        }
    }

    fn create_client(&self, name: &str) -> anyhow::Result<MidirClient> {
        MidiInput::new(name).context("initialise midir client")?;
        Ok(MidirClient { name: name.into() })
    }

    fn create_port(&self, client: &MidirClient, name: &str) -> anyhow::Result<MidirPort> {
        Ok(MidirPort {
            client_name: client.name.clone(),
            port_name: name.into(),
        })
    }

    fn connect(
        &self,
        port: &mut MidirPort,
        endpoint: &MidirEndpoint,
        mut handler: PacketHandler,
    ) -> anyhow::Result<MidirConnection> {
        match endpoint {
            MidirEndpoint::Source(target) => {
                let mut input =
                    MidiInput::new(&port.client_name).context("initialise midir for input")?;
                input.ignore(Ignore::None);
                let Some(found) = input.ports().into_iter().find(|p| p == target) else {
                    anyhow::bail!("midi source disappeared before connect");
                };
                let connection = input
                    .connect(
                        &found,
                        &port.port_name,
                        move |timestamp, message, _| {
                            handler(RawPacket::new(message, timestamp));
                        },
                        (),
                    )
                    .map_err(|err| anyhow::anyhow!("failed to connect midi input: {err}"))?;
                Ok(MidirConnection::Input(connection))
            }
            MidirEndpoint::Destination(target) => {
                let output =
                    MidiOutput::new(&port.client_name).context("initialise midir for output")?;
                let Some(found) = output.ports().into_iter().find(|p| p == target) else {
                    anyhow::bail!("midi destination disappeared before connect");
                };
                let connection = output
                    .connect(&found, &port.port_name)
                    .map_err(|err| anyhow::anyhow!("failed to open midi output: {err}"))?;
                debug!("opened midi destination; no inbound packets will arrive");
                Ok(MidirConnection::Output(connection))
            }
        }
    }

    fn watch_topology(&self, handler: TopologyHandler) -> anyhow::Result<MidirWatch> {
        MidirWatch::spawn(handler, self.poll_interval)
    }
}

/// Polling thread standing in for a native topology notification.
pub struct MidirWatch {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Compares each poll of the port lists against the previous one.
struct TopologyPoller<F> {
    probe: F,
    last: PortNames,
}

impl<F: FnMut() -> PortNames> TopologyPoller<F> {
    /// Takes the baseline immediately; it is never reported as a change.
    fn new(mut probe: F) -> Self {
        let last = probe();
        Self { probe, last }
    }

    /// Returns `true` when the port lists differ from the previous poll.
    fn poll(&mut self) -> bool {
        let current = (self.probe)();
        if current == self.last {
            return false;
        }
        self.last = current;
        true
    }
}

impl MidirWatch {
    fn spawn(handler: TopologyHandler, interval: Duration) -> anyhow::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel();
        // Baseline before returning so changes right after install are reported.
        let mut poller = TopologyPoller::new(port_names);
        let handle = thread::Builder::new()
            .name("midibridge-hotplug".into())
            .spawn(move || loop {
                thread::park_timeout(interval);
                // Stop on request or once the watch handle is gone.
                if !matches!(stop_rx.try_recv(), Err(mpsc::TryRecvError::Empty)) {
                    break;
                }
                if poller.poll() {
                    handler();
                }
            })
            .context("spawn midi hotplug thread")?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(handle),
        })
    }
}

impl Drop for MidirWatch {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("midi hotplug thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;

    use super::*;

    fn names(inputs: &[&str], outputs: &[&str]) -> PortNames {
        (
            inputs.iter().map(|name| name.to_string()).collect(),
            outputs.iter().map(|name| name.to_string()).collect(),
        )
    }

    fn scripted(polls: Vec<PortNames>) -> impl FnMut() -> PortNames {
        let mut polls = VecDeque::from(polls);
        move || polls.pop_front().expect("poll script exhausted")
    }

    #[test]
    fn baseline_is_taken_on_construction() {
        let calls = Cell::new(0);
        let poller = TopologyPoller::new(|| {
            calls.set(calls.get() + 1);
            names(&["Keys"], &[])
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(poller.last, names(&["Keys"], &[]));
    }

    #[test]
    fn unchanged_ports_are_not_reported() {
        let mut poller = TopologyPoller::new(scripted(vec![
            names(&["Keys"], &["Synth"]),
            names(&["Keys"], &["Synth"]),
            names(&["Keys"], &["Synth"]),
        ]));
        assert!(!poller.poll());
        assert!(!poller.poll());
    }

    #[test]
    fn each_change_is_reported_once() {
        let mut poller = TopologyPoller::new(scripted(vec![
            names(&["Keys"], &[]),
            names(&["Keys", "Pads"], &[]),
            names(&["Keys", "Pads"], &[]),
            names(&["Pads"], &[]),
            names(&["Pads"], &["Synth"]),
        ]));
        assert!(poller.poll());
        assert!(!poller.poll());
        assert!(poller.poll());
        assert!(poller.poll());
        assert_eq!(poller.last, names(&["Pads"], &["Synth"]));
    }

    #[test]
    fn change_before_first_poll_is_reported() {
        let mut poller = TopologyPoller::new(scripted(vec![
            names(&[], &[]),
            names(&["Keys"], &[]),
        ]));
        assert!(poller.poll());
    }
}
