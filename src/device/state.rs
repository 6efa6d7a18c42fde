use std::collections::BTreeSet;

use serde::Serialize;
use uuid::Uuid;

use super::{CharacteristicRole, PeerId};

/// Services and characteristics found on the connected tracker so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHandles {
    pub services: BTreeSet<Uuid>,
    pub roles: BTreeSet<CharacteristicRole>,
}

impl ServiceHandles {
    pub fn has(&self, role: CharacteristicRole) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting { peer: PeerId },
    Connected { peer: PeerId, handles: ServiceHandles },
    Disconnected { will_rescan: bool },
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Disconnected { .. } => "disconnected",
        }
    }

    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            ConnectionState::Connecting { peer } | ConnectionState::Connected { peer, .. } => {
                Some(peer)
            }
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}
