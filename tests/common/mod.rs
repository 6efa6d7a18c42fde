#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use dosekeeper_lib::{
    db::Database,
    device::{ConnectionState, DeviceCommand, DeviceHandle, LinkStack, PeerId},
    error::{LinkError, NotificationError},
    reminders::{FireComponents, Notifier},
};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Scan,
    StopScan,
    Connect(PeerId),
    CancelConnect(PeerId),
    DiscoverServices(PeerId),
    DiscoverCharacteristics(PeerId, Uuid),
    SetNotify(PeerId, Uuid, bool),
    Write(PeerId, Uuid, Vec<u8>),
}

/// Link stack that records every request and never fails.
#[derive(Clone, Default)]
pub struct FakeLink {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeLink {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| matches(call)).count()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl LinkStack for FakeLink {
    fn scan(&mut self, _services: &[Uuid]) -> Result<(), LinkError> {
        self.push(Call::Scan);
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.push(Call::StopScan);
    }

    fn connect(&mut self, peer: &PeerId) -> Result<(), LinkError> {
        self.push(Call::Connect(peer.clone()));
        Ok(())
    }

    fn cancel_connect(&mut self, peer: &PeerId) {
        self.push(Call::CancelConnect(peer.clone()));
    }

    fn discover_services(&mut self, peer: &PeerId, _services: &[Uuid]) -> Result<(), LinkError> {
        self.push(Call::DiscoverServices(peer.clone()));
        Ok(())
    }

    fn discover_characteristics(&mut self, peer: &PeerId, service: Uuid) -> Result<(), LinkError> {
        self.push(Call::DiscoverCharacteristics(peer.clone(), service));
        Ok(())
    }

    fn set_notify(
        &mut self,
        peer: &PeerId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), LinkError> {
        self.push(Call::SetNotify(peer.clone(), characteristic, enabled));
        Ok(())
    }

    fn write(&mut self, peer: &PeerId, characteristic: Uuid, value: &[u8]) -> Result<(), LinkError> {
        self.push(Call::Write(peer.clone(), characteristic, value.to_vec()));
        Ok(())
    }
}

/// Notifier that keeps alerts pending until the test delivers them.
#[derive(Default)]
pub struct ManualNotifier {
    pub denied: bool,
    pending: Mutex<HashSet<Uuid>>,
    cancelled: Mutex<Vec<Uuid>>,
    scheduled: Mutex<Vec<(Uuid, FireComponents, bool)>>,
}

impl ManualNotifier {
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    pub fn deliver(&self, id: Uuid) {
        self.pending.lock().unwrap().remove(&id);
    }

    pub fn pending(&self) -> HashSet<Uuid> {
        self.pending.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<Uuid> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn scheduled(&self) -> Vec<(Uuid, FireComponents, bool)> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl Notifier for ManualNotifier {
    fn request_permission(&self) -> bool {
        !self.denied
    }

    fn schedule(
        &self,
        id: Uuid,
        fire: FireComponents,
        repeats: bool,
    ) -> Result<(), NotificationError> {
        if self.denied {
            return Err(NotificationError::PermissionDenied);
        }
        self.pending.lock().unwrap().insert(id);
        self.scheduled.lock().unwrap().push((id, fire, repeats));
        Ok(())
    }

    fn cancel(&self, id: Uuid) {
        self.pending.lock().unwrap().remove(&id);
        self.cancelled.lock().unwrap().push(id);
    }

    fn list_pending(&self) -> HashSet<Uuid> {
        self.pending.lock().unwrap().clone()
    }
}

pub fn temp_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("dosekeeper.sqlite3")).unwrap();
    (dir, db)
}

pub fn peer(name: &str) -> PeerId {
    PeerId::new(name)
}

/// Device handle answering every reminder cue with `Ok`; counts the cues.
pub fn fake_device() -> (DeviceHandle, Arc<AtomicU32>) {
    let (tx, mut rx) = mpsc::channel(8);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let signals = Arc::new(AtomicU32::new(0));
    let counter = signals.clone();
    tokio::spawn(async move {
        let _state_tx = state_tx;
        while let Some(command) = rx.recv().await {
            if let DeviceCommand::SignalReminder { reply } = command {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = reply.send(Ok(()));
            }
        }
    });
    (DeviceHandle::new(tx, state_rx), signals)
}
