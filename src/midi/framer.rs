use std::fmt;
use std::mem;
use log::debug;

use crate::midi::constants::{expected_length, END_OF_EXCLUSIVE, SYSEX_SENTINEL};

/// One complete message as reassembled from a device's byte stream. The bytes are forwarded
/// to the output sink verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct MidiMessage {
    bytes: Vec<u8>,
}

impl MidiMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MidiMessage({:02X?})", self.bytes)
    }
}

impl From<Vec<u8>> for MidiMessage {
    fn from(bytes: Vec<u8>) -> Self {
        MidiMessage { bytes }
    }
}

/// Per-device reassembly state. Turns an arbitrarily chunked byte stream into complete
/// messages; every device owns its own instance.
#[derive(Debug, Default, Clone)]
pub struct MessageFramer {
    buffer: Vec<u8>,
    // 0 while idle, SYSEX_SENTINEL while waiting for END_OF_EXCLUSIVE
    expected: usize,
}

impl MessageFramer {
    pub fn new() -> Self {
        MessageFramer::default()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected = 0;
    }

    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.expected == 0
    }

    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume a single byte, returning a message if this byte completed one.
    pub fn push(&mut self, byte: u8) -> Option<MidiMessage> {
        if self.buffer.is_empty() {
            match expected_length(byte) {
                Some(expected) => self.expected = expected,
                None => {
                    debug!("Dropping stray byte {:#04x}", byte);
                    return None;
                },
            }
        }

        if self.buffer.len() < self.expected {
            self.buffer.push(byte);
        }

        // The terminator is counted as part of the message. This has not been checked against
        // every device that sends long sysex payloads.
        if self.expected == SYSEX_SENTINEL && byte == END_OF_EXCLUSIVE {
            self.expected = self.buffer.len();
        }

        if self.buffer.len() == self.expected {
            self.expected = 0;
            let bytes = mem::take(&mut self.buffer);
            return Some(MidiMessage::from(bytes));
        }

        None
    }

    /// Lazily frame `bytes`. Bytes are only consumed as the returned iterator is advanced; a
    /// partially consumed iterator leaves the remaining bytes unread.
    pub fn feed<'f, 'b>(&'f mut self, bytes: &'b [u8]) -> Frames<'f, 'b> {
        Frames {
            framer: self,
            bytes: bytes.iter(),
        }
    }
}

pub struct Frames<'f, 'b> {
    framer: &'f mut MessageFramer,
    bytes: std::slice::Iter<'b, u8>,
}

impl Iterator for Frames<'_, '_> {
    type Item = MidiMessage;

    fn next(&mut self) -> Option<MidiMessage> {
        for &byte in self.bytes.by_ref() {
            if let Some(message) = self.framer.push(byte) {
                return Some(message);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame_all(framer: &mut MessageFramer, bytes: &[u8]) -> Vec<Vec<u8>> {
        framer.feed(bytes).map(MidiMessage::into_bytes).collect()
    }

    #[test]
    fn note_on_is_emitted_once_complete() {
        let mut framer = MessageFramer::new();
        assert_eq!(frame_all(&mut framer, &[0x90, 0x3C, 0x40]), vec![vec![0x90, 0x3C, 0x40]]);
        assert!(framer.is_idle());
    }

    #[test]
    fn timing_clock_is_emitted_immediately() {
        let mut framer = MessageFramer::new();
        assert_eq!(framer.push(0xF8), Some(MidiMessage::from(vec![0xF8])));
        assert!(framer.is_idle());
    }

    #[test]
    fn sysex_is_finalized_by_the_terminator() {
        let mut framer = MessageFramer::new();
        assert_eq!(
            frame_all(&mut framer, &[0xF0, 0x01, 0x02, 0xF7]),
            vec![vec![0xF0, 0x01, 0x02, 0xF7]],
        );
        assert!(framer.is_idle());
    }

    #[test]
    fn messages_can_span_chunks() {
        let mut framer = MessageFramer::new();
        assert!(frame_all(&mut framer, &[0xB0]).is_empty());
        assert_eq!(framer.pending(), &[0xB0]);
        assert!(frame_all(&mut framer, &[0x07]).is_empty());
        assert_eq!(
            frame_all(&mut framer, &[0x64, 0xC0, 0x05, 0xF8]),
            vec![vec![0xB0, 0x07, 0x64], vec![0xC0, 0x05], vec![0xF8]],
        );
    }

    #[test]
    fn stray_data_bytes_are_dropped_while_idle() {
        let mut framer = MessageFramer::new();
        assert_eq!(
            frame_all(&mut framer, &[0x3C, 0x40, 0xD0, 0x10, 0x7F]),
            vec![vec![0xD0, 0x10]],
        );
        assert!(framer.is_idle());
    }

    #[test]
    fn song_position_and_song_select() {
        let mut framer = MessageFramer::new();
        assert_eq!(
            frame_all(&mut framer, &[0xF2, 0x01, 0x02, 0xF3, 0x04, 0xF1, 0x20]),
            vec![vec![0xF2, 0x01, 0x02], vec![0xF3, 0x04], vec![0xF1, 0x20]],
        );
    }

    #[test]
    fn lone_terminator_passes_through() {
        let mut framer = MessageFramer::new();
        assert_eq!(frame_all(&mut framer, &[0xF7]), vec![vec![0xF7]]);
    }

    #[test]
    fn oversized_sysex_is_cut_at_the_sentinel() {
        let mut framer = MessageFramer::new();
        let mut input = vec![0xF0];
        input.extend(std::iter::repeat(0x11).take(SYSEX_SENTINEL));
        input.push(0xF7);

        let messages = frame_all(&mut framer, &input);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].len(), SYSEX_SENTINEL);
        assert_eq!(messages[0][0], 0xF0);
        // the first data byte after the cut is stray, the terminator arrives on its own
        assert_eq!(messages[1], vec![0xF7]);
        assert!(framer.is_idle());
    }

    #[test]
    fn feed_is_lazy() {
        let mut framer = MessageFramer::new();
        let input = [0xF8, 0x90, 0x3C];
        let mut frames = framer.feed(&input);
        assert_eq!(frames.next(), Some(MidiMessage::from(vec![0xF8])));
        drop(frames);
        // 0x90 and 0x3C were never consumed
        assert!(framer.is_idle());
    }

    #[test]
    fn reset_discards_partial_message() {
        let mut framer = MessageFramer::new();
        assert!(frame_all(&mut framer, &[0x90, 0x3C]).is_empty());
        framer.reset();
        assert!(framer.is_idle());
        assert!(frame_all(&mut framer, &[0x40]).is_empty());
    }

    fn three_byte_status() -> impl Strategy<Value = u8> {
        prop_oneof![0x80u8..=0xBF, 0xE0u8..=0xEF]
    }

    proptest! {
        #[test]
        fn three_byte_class_emits_input(status in three_byte_status(), a in 0u8..0x80, b in 0u8..0x80) {
            let mut framer = MessageFramer::new();
            let messages = frame_all(&mut framer, &[status, a, b]);
            prop_assert_eq!(messages, vec![vec![status, a, b]]);
            prop_assert!(framer.is_idle());
        }

        #[test]
        fn sysex_payload_is_emitted_whole(data in proptest::collection::vec(0u8..0x80, 0..200)) {
            let mut framer = MessageFramer::new();
            let mut input = vec![0xF0];
            input.extend_from_slice(&data);
            input.push(0xF7);

            let messages = frame_all(&mut framer, &input);
            prop_assert_eq!(messages.len(), 1);
            prop_assert_eq!(messages[0].len(), data.len() + 2);
            prop_assert_eq!(&messages[0], &input);
            prop_assert!(framer.is_idle());
        }

        #[test]
        fn data_only_streams_emit_nothing(data in proptest::collection::vec(0u8..0x80, 0..64)) {
            let mut framer = MessageFramer::new();
            prop_assert!(frame_all(&mut framer, &data).is_empty());
            prop_assert!(framer.is_idle());
        }

        #[test]
        fn devices_do_not_share_state(
            left in proptest::collection::vec(any::<u8>(), 0..64),
            right in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let expected_left = frame_all(&mut MessageFramer::new(), &left);
            let expected_right = frame_all(&mut MessageFramer::new(), &right);

            let mut left_framer = MessageFramer::new();
            let mut right_framer = MessageFramer::new();
            let mut actual_left = Vec::new();
            let mut actual_right = Vec::new();

            for index in 0..left.len().max(right.len()) {
                if let Some(&byte) = left.get(index) {
                    actual_left.extend(frame_all(&mut left_framer, &[byte]));
                }
                if let Some(&byte) = right.get(index) {
                    actual_right.extend(frame_all(&mut right_framer, &[byte]));
                }
            }

            prop_assert_eq!(actual_left, expected_left);
            prop_assert_eq!(actual_right, expected_right);
        }
    }
}
