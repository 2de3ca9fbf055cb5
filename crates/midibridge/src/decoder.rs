//! Classification of raw packets into note events.

use serde::{Deserialize, Serialize};

use crate::device::RawPacket;
use crate::MidiTimestamp;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

/// Kind of a decoded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
    Other,
}

/// Application-facing MIDI message decoded from one packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiEvent {
    pub kind: MidiEventKind,
    pub note: u8,
    pub velocity: u8,
    pub raw_status: u8,
    /// Driver timestamp of the packet in microseconds.
    pub timestamp: MidiTimestamp,
}

impl MidiEvent {
    /// MIDI channel (0-15) carried in the status byte.
    pub fn channel(&self) -> u8 {
        self.raw_status & 0x0F
    }

    pub fn is_note_on(&self) -> bool {
        self.kind == MidiEventKind::NoteOn
    }

    pub fn is_note_off(&self) -> bool {
        self.kind == MidiEventKind::NoteOff
    }
}

/// Decode a packet. Only the first three bytes are interpreted and missing bytes
/// read as zero, so truncated packets still produce an event.
pub fn decode(packet: &RawPacket<'_>) -> MidiEvent {
    decode_bytes(packet.bytes(), packet.timestamp)
}

/// Decode a plain byte slice.
pub fn decode_bytes(bytes: &[u8], timestamp: MidiTimestamp) -> MidiEvent {
    let byte = |i: usize| bytes.get(i).copied().unwrap_or(0);
    let (status, note, velocity) = (byte(0), byte(1), byte(2));
    MidiEvent {
        kind: classify(status, velocity),
        note,
        velocity,
        raw_status: status,
        timestamp,
    }
}

fn classify(status: u8, velocity: u8) -> MidiEventKind {
    match status & 0xF0 {
        // Note-on with zero velocity is a release.
        NOTE_ON if velocity > 0 => MidiEventKind::NoteOn,
        NOTE_ON | NOTE_OFF => MidiEventKind::NoteOff,
        _ => MidiEventKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_preserves_note_and_velocity() {
        let event = decode(&RawPacket::new(&[0x90, 0x3C, 0x40], 12));
        assert_eq!(event.kind, MidiEventKind::NoteOn);
        assert_eq!(event.note, 60);
        assert_eq!(event.velocity, 64);
        assert_eq!(event.raw_status, 0x90);
        assert_eq!(event.timestamp, 12);
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let event = decode_bytes(&[0x90, 0x3C, 0x00], 0);
        assert_eq!(event.kind, MidiEventKind::NoteOff);
        assert_eq!(event.note, 60);
    }

    #[test]
    fn note_off_on_any_channel() {
        let event = decode_bytes(&[0x8A, 0x40, 0x7F], 0);
        assert_eq!(event.kind, MidiEventKind::NoteOff);
        assert_eq!(event.channel(), 10);
        assert_eq!(event.velocity, 127);
    }

    #[test]
    fn other_messages_keep_data_bytes() {
        let event = decode_bytes(&[0xB0, 0x07, 0x64], 0);
        assert_eq!(event.kind, MidiEventKind::Other);
        assert_eq!(event.note, 7);
        assert_eq!(event.velocity, 100);

        let event = decode_bytes(&[0xC3, 0x05], 0);
        assert_eq!(event.kind, MidiEventKind::Other);
        assert_eq!(event.note, 5);
        assert_eq!(event.velocity, 0);
    }

    #[test]
    fn truncated_packets_fill_zeroes() {
        let empty = decode_bytes(&[], 0);
        assert_eq!(
            (empty.kind, empty.raw_status, empty.note, empty.velocity),
            (MidiEventKind::Other, 0, 0, 0)
        );

        let status_only = decode_bytes(&[0x90], 0);
        assert_eq!(status_only.kind, MidiEventKind::NoteOff);
        assert_eq!((status_only.note, status_only.velocity), (0, 0));

        let two = decode_bytes(&[0x90, 0x3C], 0);
        assert_eq!(two.kind, MidiEventKind::NoteOff);
        assert_eq!((two.note, two.velocity), (60, 0));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let event = decode_bytes(&[0x91, 0x3C, 0x40, 0x3E, 0x40], 0);
        assert_eq!(event.kind, MidiEventKind::NoteOn);
        assert_eq!(event.note, 60);
        assert_eq!(event.channel(), 1);
    }

    #[test]
    fn windowed_packet_decodes_inside_window() {
        let buffer = [0xFE, 0x80, 0x3C, 0x00];
        let event = decode(&RawPacket::windowed(&buffer, 1, 3, 0));
        assert_eq!(event.kind, MidiEventKind::NoteOff);
        assert_eq!(event.note, 60);
    }

    #[test]
    fn serializes_kind_in_camel_case() {
        let event = decode_bytes(&[0x90, 0x3C, 0x40], 0);
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["kind"], "noteOn");
        assert_eq!(json["note"], 60);
        assert_eq!(json["velocity"], 64);
        assert_eq!(json["rawStatus"], 0x90);
    }
}
