//! Payload decoding for inbound characteristic values.
//!
//! The tracker writes its integers in the host's native byte order. Extra
//! trailing bytes are ignored, short payloads are rejected.

use serde::Serialize;

use crate::device::CharacteristicRole;
use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum DeviceEvent {
    SensorReading { value: u8 },
    DoseTaken { timestamp: u32 },
    DeviceClock { epoch_secs: u32 },
}

pub fn decode_u8(role: CharacteristicRole, bytes: &[u8]) -> Result<u8, LinkError> {
    bytes.first().copied().ok_or(LinkError::MalformedPayload {
        role,
        expected: 1,
        actual: 0,
    })
}

pub fn decode_u32(role: CharacteristicRole, bytes: &[u8]) -> Result<u32, LinkError> {
    let raw: [u8; 4] = bytes
        .get(..4)
        .and_then(|head| head.try_into().ok())
        .ok_or(LinkError::MalformedPayload {
            role,
            expected: 4,
            actual: bytes.len(),
        })?;
    Ok(u32::from_ne_bytes(raw))
}

pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_ne_bytes()
}

/// Decode a value from `role`. Outbound-only roles yield `None`.
pub fn decode(role: CharacteristicRole, bytes: &[u8]) -> Result<Option<DeviceEvent>, LinkError> {
    let event = match role {
        CharacteristicRole::SensorData => DeviceEvent::SensorReading {
            value: decode_u8(role, bytes)?,
        },
        CharacteristicRole::DoseTimestamp => DeviceEvent::DoseTaken {
            timestamp: decode_u32(role, bytes)?,
        },
        CharacteristicRole::DeviceClockRead => DeviceEvent::DeviceClock {
            epoch_secs: decode_u32(role, bytes)?,
        },
        CharacteristicRole::DeviceClockWrite | CharacteristicRole::ReminderSignal => {
            return Ok(None)
        }
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dose_timestamp_decodes_native_endian() {
        let bytes = 1_700_000_000u32.to_ne_bytes();
        assert_eq!(
            decode(CharacteristicRole::DoseTimestamp, &bytes).unwrap(),
            Some(DeviceEvent::DoseTaken {
                timestamp: 1_700_000_000
            })
        );
    }

    #[test]
    fn decoding_is_deterministic() {
        let payloads: [[u8; 4]; 4] = [
            [0, 0, 0, 0],
            [0xff, 0xff, 0xff, 0xff],
            [0x12, 0x34, 0x56, 0x78],
            encode_u32(1_681_000_000),
        ];
        for payload in payloads {
            let first = decode_u32(CharacteristicRole::DeviceClockRead, &payload).unwrap();
            for _ in 0..3 {
                assert_eq!(
                    decode_u32(CharacteristicRole::DeviceClockRead, &payload).unwrap(),
                    first
                );
            }
            assert_eq!(
                decode_u32(CharacteristicRole::DoseTimestamp, &payload).unwrap(),
                first
            );
        }
    }

    #[test]
    fn sensor_reading_uses_first_byte_only() {
        assert_eq!(
            decode(CharacteristicRole::SensorData, &[7, 1, 2]).unwrap(),
            Some(DeviceEvent::SensorReading { value: 7 })
        );
    }

    #[test]
    fn short_payloads_are_rejected() {
        assert_eq!(
            decode(CharacteristicRole::DoseTimestamp, &[1, 2, 3]),
            Err(LinkError::MalformedPayload {
                role: CharacteristicRole::DoseTimestamp,
                expected: 4,
                actual: 3,
            })
        );
        assert!(decode(CharacteristicRole::SensorData, &[]).is_err());
    }

    #[test]
    fn outbound_roles_carry_no_event() {
        assert_eq!(decode(CharacteristicRole::ReminderSignal, &[1]).unwrap(), None);
        assert_eq!(
            decode(CharacteristicRole::DeviceClockWrite, &[0, 0, 0, 0]).unwrap(),
            None
        );
    }
}
