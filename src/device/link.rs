use uuid::Uuid;

use super::PeerId;
use crate::error::LinkError;

/// Capability set of the platform BLE driver in central role.
///
/// Every call only *initiates* an operation. Completion arrives later as a
/// [`LinkEvent`] on the channel the driver was built with, so an `Err` here
/// means the request could not even be issued.
pub trait LinkStack: Send {
    fn scan(&mut self, services: &[Uuid]) -> Result<(), LinkError>;

    fn stop_scan(&mut self);

    fn connect(&mut self, peer: &PeerId) -> Result<(), LinkError>;

    /// Abort a pending connection to `peer`. No-op when nothing is pending.
    fn cancel_connect(&mut self, peer: &PeerId);

    fn discover_services(&mut self, peer: &PeerId, services: &[Uuid]) -> Result<(), LinkError>;

    fn discover_characteristics(&mut self, peer: &PeerId, service: Uuid) -> Result<(), LinkError>;

    fn set_notify(
        &mut self,
        peer: &PeerId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), LinkError>;

    fn write(&mut self, peer: &PeerId, characteristic: Uuid, value: &[u8]) -> Result<(), LinkError>;
}

/// Driver callbacks, serialized onto one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StackStateChanged {
        powered: bool,
    },
    PeerDiscovered {
        peer: PeerId,
        /// Advertised service UUIDs; empty when the driver already filtered.
        services: Vec<Uuid>,
    },
    Connected {
        peer: PeerId,
    },
    ConnectFailed {
        peer: PeerId,
        reason: String,
    },
    Disconnected {
        peer: PeerId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        peer: PeerId,
        result: Result<Vec<Uuid>, LinkError>,
    },
    CharacteristicsDiscovered {
        peer: PeerId,
        service: Uuid,
        result: Result<Vec<Uuid>, LinkError>,
    },
    ValueUpdated {
        peer: PeerId,
        characteristic: Uuid,
        value: Result<Vec<u8>, LinkError>,
    },
    WriteCompleted {
        peer: PeerId,
        characteristic: Uuid,
        result: Result<(), LinkError>,
    },
}

impl LinkEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LinkEvent::StackStateChanged { .. } => "stack-state",
            LinkEvent::PeerDiscovered { .. } => "peer-discovered",
            LinkEvent::Connected { .. } => "connected",
            LinkEvent::ConnectFailed { .. } => "connect-failed",
            LinkEvent::Disconnected { .. } => "disconnected",
            LinkEvent::ServicesDiscovered { .. } => "services-discovered",
            LinkEvent::CharacteristicsDiscovered { .. } => "characteristics-discovered",
            LinkEvent::ValueUpdated { .. } => "value-updated",
            LinkEvent::WriteCompleted { .. } => "write-completed",
        }
    }
}
