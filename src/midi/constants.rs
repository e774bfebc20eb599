/**
 * Placeholder length used while a system exclusive message is in progress. The real length is
 * only known once END_OF_EXCLUSIVE arrives; the placeholder also caps how much a sysex
 * message may buffer.
 */
pub const SYSEX_SENTINEL: usize = 256;

pub const END_OF_EXCLUSIVE: u8 = 0xF7;

/// Message class encoded in the high nibble of a status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    NoteOff,
    NoteOn,
    PolyphonicAftertouch,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchWheelChange,
    System,
}

impl StatusClass {
    pub fn from_status(byte: u8) -> Option<StatusClass> {
        match byte >> 4 {
            0x8 => Some(StatusClass::NoteOff),
            0x9 => Some(StatusClass::NoteOn),
            0xA => Some(StatusClass::PolyphonicAftertouch),
            0xB => Some(StatusClass::ControlChange),
            0xC => Some(StatusClass::ProgramChange),
            0xD => Some(StatusClass::ChannelPressure),
            0xE => Some(StatusClass::PitchWheelChange),
            0xF => Some(StatusClass::System),
            _ => None,
        }
    }
}

/// System messages, identified by the full status byte (0xF0 - 0xFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMessage {
    SystemExclusive,
    TimeCode,
    SongPosition,
    SongSelect,
    Undefined1,
    Undefined2,
    TuneRequest,
    EndOfExclusive,
    TimingClock,
    Undefined3,
    Start,
    Continue,
    Stop,
    Undefined4,
    ActiveSensing,
    Reset,
}

impl SystemMessage {
    pub fn from_status(byte: u8) -> Option<SystemMessage> {
        match byte {
            0xF0 => Some(SystemMessage::SystemExclusive),
            0xF1 => Some(SystemMessage::TimeCode),
            0xF2 => Some(SystemMessage::SongPosition),
            0xF3 => Some(SystemMessage::SongSelect),
            0xF4 => Some(SystemMessage::Undefined1),
            0xF5 => Some(SystemMessage::Undefined2),
            0xF6 => Some(SystemMessage::TuneRequest),
            END_OF_EXCLUSIVE => Some(SystemMessage::EndOfExclusive),
            0xF8 => Some(SystemMessage::TimingClock),
            0xF9 => Some(SystemMessage::Undefined3),
            0xFA => Some(SystemMessage::Start),
            0xFB => Some(SystemMessage::Continue),
            0xFC => Some(SystemMessage::Stop),
            0xFD => Some(SystemMessage::Undefined4),
            0xFE => Some(SystemMessage::ActiveSensing),
            0xFF => Some(SystemMessage::Reset),
            _ => None,
        }
    }

    pub fn expected_length(self) -> usize {
        match self {
            SystemMessage::SystemExclusive => SYSEX_SENTINEL,
            SystemMessage::Undefined1
            | SystemMessage::Undefined2
            | SystemMessage::TuneRequest
            | SystemMessage::TimingClock
            | SystemMessage::Undefined3
            | SystemMessage::Start
            | SystemMessage::Continue
            | SystemMessage::Stop
            | SystemMessage::Undefined4
            | SystemMessage::ActiveSensing
            | SystemMessage::Reset => 1,
            SystemMessage::TimeCode | SystemMessage::SongSelect => 2,
            SystemMessage::SongPosition => 3,
            // a terminator without a preceding sysex start; pass it through on its own
            SystemMessage::EndOfExclusive => 1,
        }
    }
}

/// Total message length implied by a leading status byte, or None if `byte` can not start a
/// message (data bytes, 0x00 - 0x7F).
pub fn expected_length(byte: u8) -> Option<usize> {
    match StatusClass::from_status(byte)? {
        StatusClass::ProgramChange | StatusClass::ChannelPressure => Some(2),
        StatusClass::NoteOff
        | StatusClass::NoteOn
        | StatusClass::PolyphonicAftertouch
        | StatusClass::ControlChange
        | StatusClass::PitchWheelChange => Some(3),
        StatusClass::System => SystemMessage::from_status(byte).map(SystemMessage::expected_length),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_messages_use_the_high_nibble() {
        assert_eq!(expected_length(0x80), Some(3));
        assert_eq!(expected_length(0x9F), Some(3));
        assert_eq!(expected_length(0xA3), Some(3));
        assert_eq!(expected_length(0xB0), Some(3));
        assert_eq!(expected_length(0xC5), Some(2));
        assert_eq!(expected_length(0xD0), Some(2));
        assert_eq!(expected_length(0xEF), Some(3));
    }

    #[test]
    fn system_messages_use_the_full_byte() {
        assert_eq!(expected_length(0xF0), Some(SYSEX_SENTINEL));
        assert_eq!(expected_length(0xF1), Some(2));
        assert_eq!(expected_length(0xF2), Some(3));
        assert_eq!(expected_length(0xF3), Some(2));
        assert_eq!(expected_length(END_OF_EXCLUSIVE), Some(1));
        for byte in [0xF4, 0xF5, 0xF6, 0xF8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF] {
            assert_eq!(expected_length(byte), Some(1), "status {:#04x}", byte);
        }
    }

    #[test]
    fn data_bytes_do_not_start_a_message() {
        for byte in 0x00..0x80u8 {
            assert_eq!(expected_length(byte), None);
        }
    }
}
