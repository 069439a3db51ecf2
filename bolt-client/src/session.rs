//! State and user actions for a single device.

use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    bus::SharedBus,
    device::{DeviceChanges, DeviceInfo, DevicePath, Policy, Status},
    error::{InvalidState, Result},
    presentation::{DeviceDetails, Presentation},
};

/// The mutable part of a device. Everything a front end shows is derived from
/// this pair, see [`SessionState::presentation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub status: Status,
    pub stored: bool,
}

impl SessionState {
    pub fn presentation(&self) -> Presentation {
        Presentation::new(self.status, self.stored)
    }

    /// Whether authorizing again would do nothing.
    pub fn is_authorized_or_authorizing(&self) -> bool {
        matches!(self.status, Status::Authorizing | Status::Authorized)
    }
}

/// Enrollment requests go through the manager object. Sessions hold one of these
/// instead of a reference back to the registry.
#[derive(Clone)]
pub struct ManagerHandle {
    bus: SharedBus,
    policy: Policy,
}

impl ManagerHandle {
    pub fn new(bus: SharedBus, policy: Policy) -> Self {
        Self { bus, policy }
    }

    pub async fn trust_device(&self, uid: &str) -> Result<()> {
        info!(uid, policy = %self.policy, "trusting device");
        self.bus.enroll_device(uid, self.policy, "").await
    }

    pub async fn forget_device(&self, uid: &str) -> Result<()> {
        info!(uid, "forgetting device");
        self.bus.forget_device(uid).await
    }
}

pub struct DeviceSession {
    path: DevicePath,
    info: DeviceInfo,
    details: DeviceDetails,
    state: watch::Sender<SessionState>,
    bus: SharedBus,
    manager: ManagerHandle,
}

impl DeviceSession {
    pub fn new(
        path: DevicePath,
        info: DeviceInfo,
        bus: SharedBus,
        manager: ManagerHandle,
    ) -> Self {
        let (state, _) = watch::channel(SessionState {
            status: info.status,
            stored: info.stored,
        });
        Self {
            path,
            details: DeviceDetails::new(&info),
            info,
            state,
            bus,
            manager,
        }
    }

    pub fn path(&self) -> &DevicePath {
        &self.path
    }

    pub fn uid(&self) -> &str {
        &self.info.uid
    }

    /// Properties read at discovery. `status` and `stored` in here are stale, use
    /// [`DeviceSession::state`] for those.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn details(&self) -> &DeviceDetails {
        &self.details
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn presentation(&self) -> Presentation {
        self.state().presentation()
    }

    /// The receiver sees every state change until the session is dropped.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Asks the daemon to authorize the device. The resulting status arrives later
    /// as a property change. Does nothing if the device is already authorized or
    /// being authorized.
    pub async fn authorize(&self) -> Result<()> {
        let state = self.state();
        if state.is_authorized_or_authorizing() {
            debug!(path = %self.path, status = %state.status, "authorize ignored");
            return Ok(());
        }
        info!(path = %self.path, uid = self.uid(), "authorizing device");
        self.bus.authorize(&self.path, self.manager.policy).await
    }

    /// Enrolls the device so future connections get authorized automatically.
    pub async fn trust(&self) -> Result<()> {
        if self.state().stored {
            return Err(InvalidState::AlreadyTrusted {
                uid: self.uid().to_owned(),
            }
            .into());
        }
        self.manager.trust_device(self.uid()).await
    }

    pub async fn forget(&self) -> Result<()> {
        if !self.state().stored {
            return Err(InvalidState::NotTrusted {
                uid: self.uid().to_owned(),
            }
            .into());
        }
        self.manager.forget_device(self.uid()).await
    }

    /// [`DeviceSession::forget`] if the device is trusted, otherwise
    /// [`DeviceSession::trust`].
    pub async fn toggle_trust(&self) -> Result<()> {
        if self.state().stored {
            self.forget().await
        } else {
            self.trust().await
        }
    }

    /// Applies a property change notification. Returns whether the state changed.
    pub fn on_remote_change(&self, changes: &DeviceChanges) -> bool {
        let modified = self.state.send_if_modified(|state| {
            let before = *state;
            if let Some(stored) = changes.stored {
                state.stored = stored;
            }
            if let Some(status) = changes.status {
                state.status = status;
            }
            before != *state
        });
        if modified {
            let state = self.state();
            debug!(
                path = %self.path,
                status = %state.status,
                stored = state.stored,
                "device state changed",
            );
        }
        modified
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
