//! The live set of non-host devices known to the daemon.
//!
//! The registry owns every [`DeviceSession`] and is driven by a single task, see
//! [`DeviceRegistry::run`]. Manager signals, per-device property changes and user
//! actions are all handled one at a time from that task, so no state is shared
//! between threads.

use std::collections::BTreeMap;

use futures::stream::BoxStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::{StreamExt as _, StreamMap};
use tracing::{debug, info, warn};

use crate::{
    bus::{ManagerSignal, SharedBus},
    device::{DeviceChanges, DevicePath, DeviceType, Policy},
    error::{Error, Result},
    presentation::DeviceDetails,
    session::{DeviceSession, ManagerHandle, SessionState},
};

const EVENT_CAPACITY: usize = 64;
const ACTION_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Added {
        path: DevicePath,
        details: DeviceDetails,
        /// Follows the device until it is removed.
        state: watch::Receiver<SessionState>,
    },
    Removed {
        path: DevicePath,
    },
}

/// User actions forwarded into [`DeviceRegistry::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Authorize,
    Trust,
    Forget,
    ToggleTrust,
}

#[derive(Debug)]
pub struct Action {
    pub path: DevicePath,
    pub kind: ActionKind,
    reply: oneshot::Sender<Result<()>>,
}

/// Cheap handle for issuing user actions against a running registry.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Action>,
}

impl RegistryHandle {
    /// Resolves once the request has been handed to the daemon. The effect shows
    /// up later through the session state.
    pub async fn dispatch(&self, path: DevicePath, kind: ActionKind) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Action { path, kind, reply })
            .await
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn authorize(&self, path: DevicePath) -> Result<()> {
        self.dispatch(path, ActionKind::Authorize).await
    }

    pub async fn trust(&self, path: DevicePath) -> Result<()> {
        self.dispatch(path, ActionKind::Trust).await
    }

    pub async fn forget(&self, path: DevicePath) -> Result<()> {
        self.dispatch(path, ActionKind::Forget).await
    }

    pub async fn toggle_trust(&self, path: DevicePath) -> Result<()> {
        self.dispatch(path, ActionKind::ToggleTrust).await
    }
}

pub struct DeviceRegistry {
    bus: SharedBus,
    manager: ManagerHandle,
    sessions: BTreeMap<DevicePath, DeviceSession>,
    changes: StreamMap<DevicePath, BoxStream<'static, DeviceChanges>>,
    signals: Option<BoxStream<'static, ManagerSignal>>,
    events: broadcast::Sender<RegistryEvent>,
    actions_tx: mpsc::Sender<Action>,
    actions_rx: mpsc::Receiver<Action>,
}

impl DeviceRegistry {
    pub fn new(bus: SharedBus, policy: Policy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (actions_tx, actions_rx) = mpsc::channel(ACTION_CAPACITY);
        Self {
            manager: ManagerHandle::new(bus.clone(), policy),
            bus,
            sessions: BTreeMap::new(),
            changes: StreamMap::new(),
            signals: None,
            events,
            actions_tx,
            actions_rx,
        }
    }

    /// Subscribes to the manager signals and adds every device the daemon
    /// currently knows about.
    ///
    /// # Errors
    ///
    /// Only fails if the manager itself is unreachable. Devices that cannot be
    /// read are logged and skipped.
    pub async fn initialize(&mut self) -> Result<()> {
        // Subscribe before listing so nothing added in between is missed. Adding
        // twice is harmless.
        self.signals = Some(self.bus.manager_signals().await?);

        let paths = self.bus.list_devices().await?;
        info!(count = paths.len(), "enumerated bolt devices");
        for path in paths {
            self.add_device(path).await;
        }

        Ok(())
    }

    /// Starts tracking the device at `path`. Returns whether a session was
    /// created.
    pub async fn add_device(&mut self, path: DevicePath) -> bool {
        if self.sessions.contains_key(&path) {
            warn!(%path, "device already tracked");
            return false;
        }

        let changes = match self.bus.device_changes(&path).await {
            Ok(changes) => changes,
            Err(err) => {
                warn!(%path, "failed to subscribe to device: {err:?}");
                return false;
            }
        };
        let info = match self.bus.device(&path).await {
            Ok(info) => info,
            Err(err) => {
                warn!(%path, "failed to read device: {err:?}");
                return false;
            }
        };
        if info.kind == DeviceType::Host {
            debug!(%path, "skipping host");
            return false;
        }
        if let Some(existing) = self.find_by_uid(&info.uid) {
            warn!(
                %path,
                existing = %existing.path(),
                uid = info.uid,
                "uid already tracked under another path",
            );
            return false;
        }

        info!(%path, uid = info.uid, name = info.name, "tracking device");
        let session = DeviceSession::new(
            path.clone(),
            info,
            self.bus.clone(),
            self.manager.clone(),
        );
        let event = RegistryEvent::Added {
            path: path.clone(),
            details: session.details().clone(),
            state: session.subscribe(),
        };
        self.changes.insert(path.clone(), changes);
        self.sessions.insert(path, session);
        self.events.send(event).ok();

        true
    }

    /// Stops tracking the device at `path`. Returns whether it was tracked.
    pub fn remove_device(&mut self, path: &DevicePath) -> bool {
        let Some(session) = self.sessions.remove(path) else {
            return false;
        };
        self.changes.remove(path);
        info!(%path, uid = session.uid(), "device removed");
        drop(session);
        self.events
            .send(RegistryEvent::Removed { path: path.clone() })
            .ok();

        true
    }

    /// Routes a property change to the session at `path`.
    pub fn apply_changes(&self, path: &DevicePath, changes: &DeviceChanges) -> bool {
        self.sessions
            .get(path)
            .is_some_and(|session| session.on_remote_change(changes))
    }

    pub async fn trust_device(&self, uid: &str) -> Result<()> {
        self.manager.trust_device(uid).await
    }

    pub async fn forget_device(&self, uid: &str) -> Result<()> {
        self.manager.forget_device(uid).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn handle(&self) -> RegistryHandle {
        RegistryHandle {
            tx: self.actions_tx.clone(),
        }
    }

    pub fn get(&self, path: &DevicePath) -> Option<&DeviceSession> {
        self.sessions.get(path)
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<&DeviceSession> {
        self.sessions.values().find(|session| session.uid() == uid)
    }

    /// Sessions ordered by object path.
    pub fn sessions(&self) -> impl Iterator<Item = &DeviceSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Processes notifications and actions until the daemon goes away. Calls
    /// [`DeviceRegistry::initialize`] first if that has not happened yet.
    ///
    /// # Errors
    ///
    /// [`Error::Disconnected`] once the manager signal stream ends.
    pub async fn run(mut self) -> Result<()> {
        if self.signals.is_none() {
            self.initialize().await?;
        }
        let Some(mut signals) = self.signals.take() else {
            return Err(Error::Disconnected);
        };

        loop {
            tokio::select! {
                signal = signals.next() => match signal {
                    Some(ManagerSignal::DeviceAdded(path)) => {
                        self.add_device(path).await;
                    }
                    Some(ManagerSignal::DeviceRemoved(path)) => {
                        self.remove_device(&path);
                    }
                    None => return Err(Error::Disconnected),
                },
                Some((path, changes)) = self.changes.next() => {
                    self.apply_changes(&path, &changes);
                }
                Some(action) = self.actions_rx.recv() => {
                    let result = perform(&self.sessions, &action.path, action.kind).await;
                    if let Err(err) = &result {
                        warn!(path = %action.path, kind = ?action.kind, "action failed: {err:?}");
                    }
                    action.reply.send(result).ok();
                }
            }
        }
    }
}

/// Borrows only the sessions, so the `run` future stays `Send`.
async fn perform(
    sessions: &BTreeMap<DevicePath, DeviceSession>,
    path: &DevicePath,
    kind: ActionKind,
) -> Result<()> {
    let session = sessions
        .get(path)
        .ok_or_else(|| Error::UnknownDevice(path.to_string()))?;
    match kind {
        ActionKind::Authorize => session.authorize().await,
        ActionKind::Trust => session.trust().await,
        ActionKind::Forget => session.forget().await,
        ActionKind::ToggleTrust => session.toggle_trust().await,
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
