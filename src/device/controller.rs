use std::time::Duration;

use chrono::Utc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    CharacteristicRole, ConnectionState, LinkEvent, LinkStack, PeerId, ServiceHandles,
    TRACKER_SERVICES,
};
use crate::{
    error::LinkError,
    health::HealthMonitor,
    pipeline::{decode::encode_u32, EventPipeline},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Payload the tracker treats as "play the reminder cue".
pub const REMINDER_SIGNAL_VALUE: u8 = 1;

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Requests from the rest of the companion to the link owner.
#[derive(Debug)]
pub enum DeviceCommand {
    SignalReminder {
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    CancelConnect {
        peer: PeerId,
    },
}

/// Cloneable command side of the running controller.
#[derive(Clone)]
pub struct DeviceHandle {
    commands: mpsc::Sender<DeviceCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl DeviceHandle {
    pub fn new(
        commands: mpsc::Sender<DeviceCommand>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { commands, state }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ask the tracker to play its reminder cue.
    pub async fn signal_reminder(&self) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(DeviceCommand::SignalReminder { reply })
            .await
            .map_err(|_| LinkError::NotConnected)?;
        rx.await.unwrap_or(Err(LinkError::NotConnected))
    }

    /// Abort an in-flight connection to `peer`; other peers are unaffected.
    pub async fn cancel_connect(&self, peer: PeerId) {
        if self
            .commands
            .send(DeviceCommand::CancelConnect { peer })
            .await
            .is_err()
        {
            log::warn!("device controller is gone; cancel_connect dropped");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub connect_timeout: Duration,
    pub write_clock_on_connect: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_clock_on_connect: true,
        }
    }
}

/// Connection state machine for the single tracker link.
///
/// All link callbacks go through [`ConnectionController::dispatch`]; the
/// controller is the only owner of the `LinkStack`.
pub struct ConnectionController<L: LinkStack> {
    link: L,
    pipeline: EventPipeline,
    health: HealthMonitor,
    options: ControllerOptions,
    state: ConnectionState,
    powered: bool,
    connect_deadline: Option<Instant>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<L: LinkStack> ConnectionController<L> {
    pub fn new(
        link: L,
        pipeline: EventPipeline,
        health: HealthMonitor,
        options: ControllerOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            link,
            pipeline,
            health,
            options,
            state: ConnectionState::Idle,
            powered: false,
            connect_deadline: None,
            state_tx,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Build the command channel and handle for a controller about to `run`.
    pub fn handle(&self) -> (DeviceHandle, mpsc::Receiver<DeviceCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        (DeviceHandle::new(tx, self.watch_state()), rx)
    }

    /// Serve link events and commands until `cancel` fires.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
        mut commands: mpsc::Receiver<DeviceCommand>,
        cancel: CancellationToken,
    ) {
        log_info!("device controller started");
        loop {
            let deadline = self.connect_deadline;
            tokio::select! {
                _ = cancel.cancelled() => {
                    log_info!("device controller shutting down");
                    break;
                }
                Some(event) = events.recv() => self.dispatch(event).await,
                Some(command) = commands.recv() => self.handle_command(command),
                _ = wait_for(deadline) => self.on_connect_timeout(),
            }
        }

        if let Some(peer) = self.state.peer().cloned() {
            self.link.cancel_connect(&peer);
        }
        self.link.stop_scan();
    }

    /// Single entry point for every platform callback.
    pub async fn dispatch(&mut self, event: LinkEvent) {
        log_debug!("link event {} in state {}", event.kind(), self.state.label());
        match event {
            LinkEvent::StackStateChanged { powered } => self.on_stack_state(powered),
            LinkEvent::PeerDiscovered { peer, services } => self.on_peer_discovered(peer, &services),
            LinkEvent::Connected { peer } => self.on_connected(peer),
            LinkEvent::ConnectFailed { peer, reason } => {
                if self.is_current_peer(&peer) {
                    log_warn!("{}", LinkError::ConnectFailed { peer, reason });
                    self.link_lost();
                }
            }
            LinkEvent::Disconnected { peer, reason } => self.on_disconnected(peer, reason),
            LinkEvent::ServicesDiscovered { peer, result } => {
                self.on_services_discovered(peer, result)
            }
            LinkEvent::CharacteristicsDiscovered {
                peer,
                service,
                result,
            } => self.on_characteristics_discovered(peer, service, result),
            LinkEvent::ValueUpdated {
                peer,
                characteristic,
                value,
            } => self.on_value_updated(peer, characteristic, value).await,
            LinkEvent::WriteCompleted {
                peer,
                characteristic,
                result,
            } => {
                let role = CharacteristicRole::from_uuid(characteristic);
                match (role, result) {
                    (Some(role), Ok(())) => log_debug!("write to {role} on {peer} acknowledged"),
                    (_, Ok(())) => log_debug!("write to {characteristic} on {peer} acknowledged"),
                    (_, Err(err)) => log_warn!("write on {peer} failed: {err}"),
                }
            }
        }
    }

    pub fn handle_command(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::SignalReminder { reply } => {
                let result = self.signal_reminder();
                if let Err(err) = &result {
                    log_warn!("reminder signal abandoned: {err}");
                }
                let _ = reply.send(result);
            }
            DeviceCommand::CancelConnect { peer } => self.cancel_connect(&peer),
        }
    }

    /// Write the one-byte reminder cue. Not retried when it cannot be sent.
    pub fn signal_reminder(&mut self) -> Result<(), LinkError> {
        let ConnectionState::Connected { peer, handles } = &self.state else {
            return Err(LinkError::NotConnected);
        };
        if !handles.has(CharacteristicRole::ReminderSignal) {
            return Err(LinkError::CharacteristicUnavailable(
                CharacteristicRole::ReminderSignal,
            ));
        }

        let peer = peer.clone();
        self.link.write(
            &peer,
            CharacteristicRole::ReminderSignal.uuid(),
            &[REMINDER_SIGNAL_VALUE],
        )?;
        log_info!("reminder cue sent to {peer}");
        Ok(())
    }

    /// Abort a pending connect to `peer` and go back to scanning.
    pub fn cancel_connect(&mut self, peer: &PeerId) {
        match &self.state {
            ConnectionState::Connecting { peer: pending } if pending == peer => {
                log_info!("cancelling connection attempt to {peer}");
                self.link.cancel_connect(peer);
                self.link_lost();
            }
            _ => log_debug!("no pending connection to {peer}; cancel ignored"),
        }
    }

    fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if let ConnectionState::Connecting { peer } = &self.state {
            let peer = peer.clone();
            log_warn!("{}", LinkError::ConnectTimeout(peer.clone()));
            self.cancel_connect(&peer);
        }
    }

    fn on_stack_state(&mut self, powered: bool) {
        self.powered = powered;
        if !powered {
            log_warn!("{}", LinkError::StackUnavailable);
            self.connect_deadline = None;
            self.set_state(ConnectionState::Idle);
            return;
        }

        match self.state {
            ConnectionState::Idle | ConnectionState::Disconnected { .. } => self.start_scan(),
            _ => log_debug!("stack powered while {}; nothing to do", self.state.label()),
        }
    }

    fn start_scan(&mut self) {
        match self.link.scan(&TRACKER_SERVICES) {
            Ok(()) => {
                log_info!("scanning for tracker");
                self.set_state(ConnectionState::Scanning);
            }
            Err(err) => {
                log_error!("{err}");
                self.set_state(ConnectionState::Idle);
            }
        }
    }

    fn on_peer_discovered(&mut self, peer: PeerId, services: &[Uuid]) {
        if self.state != ConnectionState::Scanning {
            return;
        }
        let advertises_tracker =
            services.is_empty() || services.iter().any(|uuid| TRACKER_SERVICES.contains(uuid));
        if !advertises_tracker {
            log_debug!("ignoring {peer}: no tracker service advertised");
            return;
        }

        match self.link.connect(&peer) {
            Ok(()) => {
                log_info!("connecting to {peer}");
                self.connect_deadline = Some(Instant::now() + self.options.connect_timeout);
                self.set_state(ConnectionState::Connecting { peer });
            }
            Err(err) => log_warn!("could not start connect to {peer}: {err}"),
        }
    }

    fn on_connected(&mut self, peer: PeerId) {
        if !matches!(&self.state, ConnectionState::Connecting { peer: pending } if *pending == peer)
        {
            log_warn!("unexpected connection from {peer}; cancelling");
            self.link.cancel_connect(&peer);
            return;
        }

        log_info!("connected to {peer}");
        self.connect_deadline = None;
        self.link.stop_scan();
        self.set_state(ConnectionState::Connected {
            peer: peer.clone(),
            handles: ServiceHandles::default(),
        });

        if let Err(err) = self.link.discover_services(&peer, &TRACKER_SERVICES) {
            log_error!("{}", LinkError::ServiceDiscovery(err.to_string()));
        }
    }

    fn on_disconnected(&mut self, peer: PeerId, reason: Option<String>) {
        if !self.is_current_peer(&peer) {
            log_debug!("disconnect from {peer} ignored in state {}", self.state.label());
            return;
        }
        match reason {
            Some(reason) => log_warn!("disconnected from {peer}: {reason}"),
            None => log_info!("disconnected from {peer}"),
        }
        self.link_lost();
    }

    fn on_services_discovered(&mut self, peer: PeerId, result: Result<Vec<Uuid>, LinkError>) {
        if !self.is_connected_to(&peer) {
            return;
        }
        let services = match result {
            Ok(services) => services,
            Err(err) => {
                log_error!("{}", LinkError::ServiceDiscovery(err.to_string()));
                return;
            }
        };

        for service in services.into_iter().filter(|s| TRACKER_SERVICES.contains(s)) {
            if let ConnectionState::Connected { handles, .. } = &mut self.state {
                handles.services.insert(service);
            }
            if let Err(err) = self.link.discover_characteristics(&peer, service) {
                log_error!("{}", LinkError::CharacteristicDiscovery(err.to_string()));
            }
        }
        self.publish_state();
    }

    fn on_characteristics_discovered(
        &mut self,
        peer: PeerId,
        service: Uuid,
        result: Result<Vec<Uuid>, LinkError>,
    ) {
        if !self.is_connected_to(&peer) {
            return;
        }
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(err) => {
                log_error!(
                    "{} (service {service})",
                    LinkError::CharacteristicDiscovery(err.to_string())
                );
                return;
            }
        };

        for role in characteristics
            .into_iter()
            .filter_map(CharacteristicRole::from_uuid)
        {
            if let ConnectionState::Connected { handles, .. } = &mut self.state {
                handles.roles.insert(role);
            }

            let outcome = if role.is_notify() {
                self.link.set_notify(&peer, role.uuid(), true)
            } else if role == CharacteristicRole::DeviceClockWrite
                && self.options.write_clock_on_connect
            {
                self.sync_clock(&peer)
            } else {
                Ok(())
            };

            if let Err(err) = outcome {
                log_error!("setting up {role} on {peer} failed: {err}");
            }
        }
        self.publish_state();
    }

    fn sync_clock(&mut self, peer: &PeerId) -> Result<(), LinkError> {
        let now = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        self.link.write(
            peer,
            CharacteristicRole::DeviceClockWrite.uuid(),
            &encode_u32(now),
        )?;
        log_info!("synced tracker clock to {now}");
        Ok(())
    }

    async fn on_value_updated(
        &mut self,
        peer: PeerId,
        characteristic: Uuid,
        value: Result<Vec<u8>, LinkError>,
    ) {
        if !self.is_connected_to(&peer) {
            return;
        }
        let Some(role) = CharacteristicRole::from_uuid(characteristic) else {
            log_debug!("value from unknown characteristic {characteristic}");
            return;
        };
        match value {
            Ok(bytes) => {
                self.pipeline.handle_payload(role, &bytes).await;
            }
            Err(err) => log_warn!("reading {role} from {peer} failed: {err}"),
        }
    }

    /// Drop to `Disconnected` and, if the stack is still up, straight back to scanning.
    fn link_lost(&mut self) {
        self.connect_deadline = None;
        let will_rescan = self.powered;
        self.set_state(ConnectionState::Disconnected { will_rescan });
        if will_rescan {
            self.start_scan();
        }
    }

    fn is_current_peer(&self, peer: &PeerId) -> bool {
        self.state.peer() == Some(peer)
    }

    fn is_connected_to(&self, peer: &PeerId) -> bool {
        matches!(&self.state, ConnectionState::Connected { peer: current, .. } if current == peer)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log_debug!("link state {} -> {}", self.state.label(), state.label());
        }
        self.state = state;
        self.publish_state();
    }

    fn publish_state(&self) {
        self.health.set_link_state(self.state.label());
        self.state_tx.send_replace(self.state.clone());
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
