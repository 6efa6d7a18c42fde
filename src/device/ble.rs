//! [`LinkStack`] over the host's Bluetooth adapter, through btleplug.
//!
//! btleplug is async while `LinkStack` calls only initiate, so each request
//! is spawned onto the runtime and its completion sent back as a
//! [`LinkEvent`]. Adapter events (discovery, disconnects) are forwarded by one
//! long-lived task.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use super::{CharacteristicRole, LinkEvent, LinkStack, PeerId};
use crate::error::LinkError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

type Peers = Arc<Mutex<HashMap<PeerId, Peripheral>>>;

fn lock(peers: &Peers) -> MutexGuard<'_, HashMap<PeerId, Peripheral>> {
    match peers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn peer_id(id: &PeripheralId) -> PeerId {
    PeerId::new(format!("{id:?}"))
}

/// Link on the first adapter the platform reports.
pub struct BtleplugLink {
    adapter: Adapter,
    runtime: Handle,
    events: mpsc::UnboundedSender<LinkEvent>,
    peers: Peers,
    connecting: HashMap<PeerId, JoinHandle<()>>,
    forwarder: JoinHandle<()>,
}

impl BtleplugLink {
    /// Open the adapter and start forwarding its events. The receiver is the
    /// queue to hand to [`crate::Companion::start`].
    pub async fn open() -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), LinkError> {
        let unavailable = |err: btleplug::Error| {
            log_warn!("bluetooth unavailable: {err}");
            LinkError::StackUnavailable
        };

        let manager = Manager::new().await.map_err(unavailable)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(unavailable)?
            .into_iter()
            .next()
            .ok_or(LinkError::StackUnavailable)?;
        let central_events = adapter.events().await.map_err(unavailable)?;

        let (events, receiver) = mpsc::unbounded_channel();
        let peers = Peers::default();
        let forwarder = tokio::spawn(forward_adapter_events(
            adapter.clone(),
            central_events,
            events.clone(),
            peers.clone(),
        ));

        // btleplug only hands out adapters that are present
        let _ = events.send(LinkEvent::StackStateChanged { powered: true });
        log_info!("bluetooth adapter opened");

        Ok((
            Self {
                adapter,
                runtime: Handle::current(),
                events,
                peers,
                connecting: HashMap::new(),
                forwarder,
            },
            receiver,
        ))
    }

    fn peripheral(&self, peer: &PeerId) -> Result<Peripheral, LinkError> {
        lock(&self.peers)
            .get(peer)
            .cloned()
            .ok_or(LinkError::NotConnected)
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.forwarder.abort();
        for (_, task) in self.connecting.drain() {
            task.abort();
        }
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, LinkError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == uuid)
        .ok_or_else(|| match CharacteristicRole::from_uuid(uuid) {
            Some(role) => LinkError::CharacteristicUnavailable(role),
            None => LinkError::CharacteristicDiscovery(format!("{uuid} was not discovered")),
        })
}

impl LinkStack for BtleplugLink {
    fn scan(&mut self, services: &[Uuid]) -> Result<(), LinkError> {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        self.runtime.spawn(async move {
            if let Err(err) = adapter.start_scan(filter).await {
                log_warn!("{}", LinkError::ScanFailed(err.to_string()));
                let _ = events.send(LinkEvent::StackStateChanged { powered: false });
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                log_debug!("stop scan: {err}");
            }
        });
    }

    fn connect(&mut self, peer: &PeerId) -> Result<(), LinkError> {
        let peripheral = self
            .peripheral(peer)
            .map_err(|_| LinkError::ConnectFailed {
                peer: peer.clone(),
                reason: "peer was not seen while scanning".into(),
            })?;
        let events = self.events.clone();
        let target = peer.clone();

        let task = self.runtime.spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => {
                    forward_notifications(peripheral, target.clone(), events.clone()).await;
                    LinkEvent::Connected { peer: target }
                }
                Err(err) => LinkEvent::ConnectFailed {
                    peer: target,
                    reason: err.to_string(),
                },
            };
            let _ = events.send(event);
        });

        if let Some(previous) = self.connecting.insert(peer.clone(), task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel_connect(&mut self, peer: &PeerId) {
        let Some(task) = self.connecting.remove(peer) else {
            return;
        };
        task.abort();
        if let Ok(peripheral) = self.peripheral(peer) {
            self.runtime.spawn(async move {
                let _ = peripheral.disconnect().await;
            });
        }
    }

    fn discover_services(&mut self, peer: &PeerId, services: &[Uuid]) -> Result<(), LinkError> {
        let peripheral = self.peripheral(peer)?;
        self.connecting.remove(peer);
        let wanted = services.to_vec();
        let events = self.events.clone();
        let peer = peer.clone();

        self.runtime.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral
                    .services()
                    .into_iter()
                    .map(|service| service.uuid)
                    .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
                    .collect()),
                Err(err) => Err(LinkError::ServiceDiscovery(err.to_string())),
            };
            let _ = events.send(LinkEvent::ServicesDiscovered { peer, result });
        });
        Ok(())
    }

    /// btleplug discovers characteristics together with services, so this
    /// answers from what the peripheral already holds.
    fn discover_characteristics(&mut self, peer: &PeerId, service: Uuid) -> Result<(), LinkError> {
        let peripheral = self.peripheral(peer)?;
        let result = peripheral
            .services()
            .into_iter()
            .find(|candidate| candidate.uuid == service)
            .map(|found| {
                found
                    .characteristics
                    .iter()
                    .map(|characteristic| characteristic.uuid)
                    .collect()
            })
            .ok_or_else(|| {
                LinkError::CharacteristicDiscovery(format!("service {service} not found"))
            });

        let _ = self.events.send(LinkEvent::CharacteristicsDiscovered {
            peer: peer.clone(),
            service,
            result,
        });
        Ok(())
    }

    fn set_notify(
        &mut self,
        peer: &PeerId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), LinkError> {
        let peripheral = self.peripheral(peer)?;
        let target = find_characteristic(&peripheral, characteristic)?;

        self.runtime.spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            if let Err(err) = result {
                log_warn!("notify={enabled} on {characteristic} failed: {err}");
            }
        });
        Ok(())
    }

    fn write(&mut self, peer: &PeerId, characteristic: Uuid, value: &[u8]) -> Result<(), LinkError> {
        let role = CharacteristicRole::from_uuid(characteristic).ok_or_else(|| {
            LinkError::CharacteristicDiscovery(format!("{characteristic} is not a tracker characteristic"))
        })?;
        let peripheral = self.peripheral(peer)?;
        let target = find_characteristic(&peripheral, characteristic)?;
        let value = value.to_vec();
        let events = self.events.clone();
        let peer = peer.clone();

        self.runtime.spawn(async move {
            let result = peripheral
                .write(&target, &value, WriteType::WithResponse)
                .await
                .map_err(|err| LinkError::WriteFailed {
                    role,
                    reason: err.to_string(),
                });
            let _ = events.send(LinkEvent::WriteCompleted {
                peer,
                characteristic,
                result,
            });
        });
        Ok(())
    }
}

/// Turn adapter events into discovery and disconnect callbacks until the
/// adapter stream ends or nobody listens any more.
async fn forward_adapter_events<S>(
    adapter: Adapter,
    mut central_events: S,
    events: mpsc::UnboundedSender<LinkEvent>,
    peers: Peers,
) where
    S: Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = central_events.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) => {
                let Some(peripheral) = remember(&adapter, &peers, &id).await else {
                    continue;
                };
                let services = match peripheral.properties().await {
                    Ok(Some(properties)) => properties.services,
                    _ => Vec::new(),
                };
                LinkEvent::PeerDiscovered {
                    peer: peer_id(&id),
                    services,
                }
            }
            CentralEvent::ServicesAdvertisement { id, services } => {
                if remember(&adapter, &peers, &id).await.is_none() {
                    continue;
                }
                LinkEvent::PeerDiscovered {
                    peer: peer_id(&id),
                    services,
                }
            }
            CentralEvent::DeviceDisconnected(id) => LinkEvent::Disconnected {
                peer: peer_id(&id),
                reason: None,
            },
            _ => continue,
        };

        if events.send(forwarded).is_err() {
            break;
        }
    }
    log_info!("adapter event stream closed");
}

async fn remember(adapter: &Adapter, peers: &Peers, id: &PeripheralId) -> Option<Peripheral> {
    match adapter.peripheral(id).await {
        Ok(peripheral) => {
            lock(peers).insert(peer_id(id), peripheral.clone());
            Some(peripheral)
        }
        Err(err) => {
            log_debug!("lost track of {id:?}: {err}");
            None
        }
    }
}

/// Forward value notifications from a freshly connected peripheral. The
/// stream ends on its own when the peripheral disconnects.
async fn forward_notifications(
    peripheral: Peripheral,
    peer: PeerId,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(err) => {
            log_warn!("no notifications from {peer}: {err}");
            return;
        }
    };

    tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let event = LinkEvent::ValueUpdated {
                peer: peer.clone(),
                characteristic: notification.uuid,
                value: Ok(notification.value),
            };
            if events.send(event).is_err() {
                break;
            }
        }
    });
}
