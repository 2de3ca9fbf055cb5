//! Hand-off from driver callback threads to the consumer's delivery context.
//!
//! Producers clone [`EventSender`] freely; there is exactly one [`EventReceiver`],
//! and whichever thread drains it is the delivery context. Events travel through a
//! single FIFO so the order of each producer is kept.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::json;
use tracing::debug;

use crate::decoder::MidiEvent;
use crate::directory::ConnectionSnapshot;

/// Event name used for decoded messages.
pub const MESSAGE_EVENT: &str = "MIDI_MSG_EVENT";
/// Event name used for device list changes.
pub const CONNECTION_EVENT: &str = "MIDI_CON_EVENT";

/// Anything the bridge delivers to its consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Decoded packet from the connected endpoint.
    Message(MidiEvent),
    /// Device list after a topology change.
    Devices(ConnectionSnapshot),
}

impl BridgeEvent {
    /// Name under which collaborators publish this event.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::Message(_) => MESSAGE_EVENT,
            BridgeEvent::Devices(_) => CONNECTION_EVENT,
        }
    }

    /// JSON envelope `{ "event": name, "payload": ... }`.
    pub fn to_json(&self) -> serde_json::Value {
        let payload = match self {
            BridgeEvent::Message(event) => json!(event),
            BridgeEvent::Devices(snapshot) => json!(snapshot),
        };
        json!({ "event": self.name(), "payload": payload })
    }
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer side, usable from any thread.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: Sender<BridgeEvent>,
}

impl EventSender {
    /// Queue a decoded message. Returns `false` once the receiver is gone.
    pub fn send_message(&self, event: MidiEvent) -> bool {
        self.send(BridgeEvent::Message(event))
    }

    /// Queue a device snapshot. Returns `false` once the receiver is gone.
    pub fn send_snapshot(&self, snapshot: ConnectionSnapshot) -> bool {
        self.send(BridgeEvent::Devices(snapshot))
    }

    fn send(&self, event: BridgeEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(err) => {
                debug!(event = err.0.name(), "MIDI consumer gone; dropping event");
                false
            }
        }
    }
}

/// Consumer side. Not cloneable: the thread that drains it is the delivery context.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<BridgeEvent>,
}

impl EventReceiver {
    /// Block until the next event. `None` once every sender is dropped.
    pub fn recv(&self) -> Option<BridgeEvent> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BridgeEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take every queued event.
    pub fn drain(&self) -> Vec<BridgeEvent> {
        self.rx.try_iter().collect()
    }

    /// Run `f` on the calling thread for every queued event, returning how many ran.
    pub fn dispatch_pending<F>(&self, mut f: F) -> usize
    where
        F: FnMut(BridgeEvent),
    {
        let mut delivered = 0;
        for event in self.rx.try_iter() {
            f(event);
            delivered += 1;
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_bytes;
    use std::thread;

    #[test]
    fn preserves_order_per_producer_without_coalescing() {
        let (tx, rx) = channel();
        let producer = {
            let tx = tx.clone();
            thread::spawn(move || {
                for note in 0..50u8 {
                    tx.send_message(decode_bytes(&[0x90, note, 100], note as u64));
                }
            })
        };
        tx.send_snapshot(ConnectionSnapshot {
            names: vec!["A".into()],
        });
        tx.send_snapshot(ConnectionSnapshot {
            names: vec!["A".into()],
        });
        producer.join().unwrap();

        let events = rx.drain();
        let notes: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                BridgeEvent::Message(msg) => Some(msg.note),
                BridgeEvent::Devices(_) => None,
            })
            .collect();
        assert_eq!(notes, (0..50).collect::<Vec<_>>());
        let snapshots = events
            .iter()
            .filter(|event| matches!(event, BridgeEvent::Devices(_)))
            .count();
        assert_eq!(snapshots, 2);
    }

    #[test]
    fn dispatch_runs_on_calling_thread() {
        let (tx, rx) = channel();
        tx.send_message(decode_bytes(&[0x80, 60, 0], 0));
        tx.send_message(decode_bytes(&[0x90, 60, 1], 0));

        let caller = thread::current().id();
        let mut seen = Vec::new();
        let count = rx.dispatch_pending(|event| {
            assert_eq!(thread::current().id(), caller);
            seen.push(event.name());
        });
        assert_eq!(count, 2);
        assert_eq!(seen, vec![MESSAGE_EVENT, MESSAGE_EVENT]);
        assert!(rx.is_empty());
    }

    #[test]
    fn send_reports_closed_receiver() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(!tx.send_snapshot(ConnectionSnapshot::default()));
    }

    #[test]
    fn json_envelope_names_event() {
        let message = BridgeEvent::Message(decode_bytes(&[0x90, 0x3C, 0x40], 0));
        let value = message.to_json();
        assert_eq!(value["event"], "MIDI_MSG_EVENT");
        assert_eq!(value["payload"]["kind"], "noteOn");

        let devices = BridgeEvent::Devices(ConnectionSnapshot {
            names: vec!["Keys".into()],
        });
        let value = devices.to_json();
        assert_eq!(value["event"], "MIDI_CON_EVENT");
        assert_eq!(value["payload"]["names"][0], "Keys");
    }
}
