//! Central-role link to the dose tracker.
//!
//! 1. **Link** - the `LinkStack` trait wrapping the platform BLE driver and the
//!    `LinkEvent` union its callbacks are delivered as.
//! 2. **Controller** - the connection state machine: scan, connect, discover,
//!    subscribe, receive, re-scan on drop.
//! 3. **Handle** - cloneable command side used by the reminder loop to ask the
//!    controller for an outbound write.
//!
//! With the `ble` feature, [`ble::BtleplugLink`] drives the host adapter.

#[cfg(feature = "ble")]
pub mod ble;
pub mod controller;
pub mod link;
pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "ble")]
pub use ble::BtleplugLink;
pub use controller::{ConnectionController, ControllerOptions, DeviceCommand, DeviceHandle};
pub use link::{LinkEvent, LinkStack};
pub use state::{ConnectionState, ServiceHandles};

/// Bluetooth base UUID with the 16-bit slot zeroed.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

pub const SENSOR_SERVICE: Uuid = short_uuid(0x180D);
pub const TIME_SYNC_SERVICE: Uuid = short_uuid(0x180F);

/// Services the tracker advertises; scanning and discovery filter on these.
pub const TRACKER_SERVICES: [Uuid; 2] = [SENSOR_SERVICE, TIME_SYNC_SERVICE];

/// Platform-assigned peer identity (address or OS handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Semantic tag for each attribute the tracker exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CharacteristicRole {
    SensorData,
    DoseTimestamp,
    DeviceClockRead,
    DeviceClockWrite,
    ReminderSignal,
}

impl CharacteristicRole {
    pub const ALL: [CharacteristicRole; 5] = [
        CharacteristicRole::SensorData,
        CharacteristicRole::DoseTimestamp,
        CharacteristicRole::DeviceClockRead,
        CharacteristicRole::DeviceClockWrite,
        CharacteristicRole::ReminderSignal,
    ];

    pub const fn uuid(self) -> Uuid {
        match self {
            CharacteristicRole::SensorData => short_uuid(0x2A37),
            CharacteristicRole::DoseTimestamp => short_uuid(0x2A38),
            CharacteristicRole::DeviceClockRead => short_uuid(0x2A39),
            CharacteristicRole::DeviceClockWrite => short_uuid(0x2A3A),
            CharacteristicRole::ReminderSignal => short_uuid(0x2A3B),
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.uuid() == uuid)
    }

    /// Roles the host subscribes to for change notifications.
    pub fn is_notify(self) -> bool {
        matches!(
            self,
            CharacteristicRole::SensorData
                | CharacteristicRole::DoseTimestamp
                | CharacteristicRole::DeviceClockRead
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CharacteristicRole::SensorData => "sensor-data",
            CharacteristicRole::DoseTimestamp => "dose-timestamp",
            CharacteristicRole::DeviceClockRead => "device-clock-read",
            CharacteristicRole::DeviceClockWrite => "device-clock-write",
            CharacteristicRole::ReminderSignal => "reminder-signal",
        }
    }
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuids_expand_onto_bluetooth_base() {
        assert_eq!(
            SENSOR_SERVICE.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CharacteristicRole::DoseTimestamp.uuid().to_string(),
            "00002a38-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn roles_round_trip_through_uuid() {
        for role in CharacteristicRole::ALL {
            assert_eq!(CharacteristicRole::from_uuid(role.uuid()), Some(role));
        }
        assert_eq!(CharacteristicRole::from_uuid(short_uuid(0x2A19)), None);
    }

    #[test]
    fn only_read_roles_are_subscribed() {
        assert!(CharacteristicRole::SensorData.is_notify());
        assert!(CharacteristicRole::DeviceClockRead.is_notify());
        assert!(!CharacteristicRole::DeviceClockWrite.is_notify());
        assert!(!CharacteristicRole::ReminderSignal.is_notify());
    }
}
