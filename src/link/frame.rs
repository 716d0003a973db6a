// Application command framing
//
// Frame format: [status, command id, payload...]
// The payload is a fixed number of signed 16-bit little-endian values per
// command. No length field and no checksum at this layer; the radio framing
// around it carries both.

/// Outbound application frames always carry status 0. Other status values
/// are reserved for the firmware side.
pub const STATUS_APPLICATION: u8 = 0;

/// Command set understood by the robot firmware
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SoftwareReset = 0,
    SetPidGains = 1,
    SetThrustOpenLoop = 2,
    SetThrustClosedLoop = 3,
    WhoAmI = 4,
}

impl Command {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Number of 16-bit payload values the command carries.
    ///
    /// The firmware has no error path for a malformed frame, so arity is
    /// enforced here, before anything reaches the air.
    pub fn arity(self) -> usize {
        match self {
            Command::SoftwareReset => 1,
            Command::SetPidGains => 10,
            Command::SetThrustOpenLoop => 2,
            Command::SetThrustClosedLoop => 5,
            Command::WhoAmI => 0,
        }
    }

    pub fn from_id(id: u8) -> Option<Command> {
        match id {
            0 => Some(Command::SoftwareReset),
            1 => Some(Command::SetPidGains),
            2 => Some(Command::SetThrustOpenLoop),
            3 => Some(Command::SetThrustClosedLoop),
            4 => Some(Command::WhoAmI),
            _ => None,
        }
    }
}

/// Error types for the command codec
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{command:?} takes {expected} payload values, got {got}")]
    Arity {
        command: Command,
        expected: usize,
        got: usize,
    },

    #[error("frame too short: {len} bytes")]
    Truncated { len: usize },

    #[error("payload length {len} is not a multiple of 2")]
    OddPayload { len: usize },
}

/// Pack a command and its payload values into frame bytes.
pub fn encode(command: Command, values: &[i16]) -> Result<Vec<u8>, FrameError> {
    if values.len() != command.arity() {
        return Err(FrameError::Arity {
            command,
            expected: command.arity(),
            got: values.len(),
        });
    }

    let mut frame = Vec::with_capacity(2 + 2 * values.len());
    frame.push(STATUS_APPLICATION);
    frame.push(command.id());
    for &value in values {
        frame.extend_from_slice(&value.to_le_bytes());
    }
    Ok(frame)
}

/// Unpack an inbound frame into (status, command id, payload values).
///
/// The command id stays raw so unknown ids can be logged and dropped
/// instead of failing the receive path.
pub fn decode(bytes: &[u8]) -> Result<(u8, u8, Vec<i16>), FrameError> {
    if bytes.len() < 2 {
        return Err(FrameError::Truncated { len: bytes.len() });
    }
    let payload = &bytes[2..];
    if payload.len() % 2 != 0 {
        return Err(FrameError::OddPayload { len: payload.len() });
    }

    let values = payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok((bytes[0], bytes[1], values))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_COMMANDS: [Command; 5] = [
        Command::SoftwareReset,
        Command::SetPidGains,
        Command::SetThrustOpenLoop,
        Command::SetThrustClosedLoop,
        Command::WhoAmI,
    ];

    #[test]
    fn test_open_loop_thrust_bytes() {
        // 150 and -75 as signed little-endian 16-bit
        let frame = encode(Command::SetThrustOpenLoop, &[150, -75]).unwrap();
        assert_eq!(frame, vec![0x00, 0x02, 0x96, 0x00, 0xB5, 0xFF]);
    }

    #[test]
    fn test_round_trip_all_commands() {
        for command in ALL_COMMANDS {
            let values: Vec<i16> = (0..command.arity())
                .map(|i| (i as i16 + 1) * -101)
                .collect();
            let frame = encode(command, &values).unwrap();
            let (status, id, decoded) = decode(&frame).unwrap();
            assert_eq!(status, STATUS_APPLICATION);
            assert_eq!(id, command.id());
            assert_eq!(decoded, values);
        }
    }

    #[test]
    fn test_encode_rejects_wrong_arity() {
        for command in ALL_COMMANDS {
            let too_many = vec![0i16; command.arity() + 1];
            assert!(matches!(
                encode(command, &too_many),
                Err(FrameError::Arity { .. })
            ));
            if command.arity() > 0 {
                let too_few = vec![0i16; command.arity() - 1];
                assert!(matches!(
                    encode(command, &too_few),
                    Err(FrameError::Arity { .. })
                ));
            }
        }
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(matches!(decode(&[]), Err(FrameError::Truncated { len: 0 })));
        assert!(matches!(
            decode(&[0x00]),
            Err(FrameError::Truncated { len: 1 })
        ));
    }

    #[test]
    fn test_decode_rejects_odd_payload() {
        assert!(matches!(
            decode(&[0x00, 0x02, 0x96]),
            Err(FrameError::OddPayload { len: 1 })
        ));
    }

    #[test]
    fn test_decode_keeps_unknown_command_raw() {
        let (status, id, values) = decode(&[0x00, 0x7F, 0x01, 0x00]).unwrap();
        assert_eq!(status, 0);
        assert_eq!(id, 0x7F);
        assert_eq!(values, vec![1]);
        assert!(Command::from_id(id).is_none());
    }
}
