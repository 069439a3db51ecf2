use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    daemon::BoltDaemon,
    device::Policy,
    error::Result,
    registry::{DeviceRegistry, RegistryHandle},
};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct Settings {
    /// Bus to connect to. `None` means the system bus.
    pub dbus_address: Option<String>,
    pub well_known_name: String,
    pub manager_object_path: String,
    /// Upper bound for every remote call made on behalf of the caller.
    pub call_timeout: Duration,
    /// Policy used for both `Authorize` and `EnrollDevice`.
    pub policy: Policy,
}

impl Settings {
    fn new() -> Self {
        Self {
            dbus_address: None,
            well_known_name: bolt_dbus::SERVICE.to_string(),
            manager_object_path: bolt_dbus::MANAGER_PATH.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            policy: Policy::Auto,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected daemon plus the registry tracking its devices.
#[derive(Debug)]
pub struct Application {
    pub registry: DeviceRegistry,
    pub settings: Settings,
}

impl Application {
    /// Connects to the daemon and enumerates the devices it currently knows about.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Connection`] or [`crate::Error::Timeout`] if the daemon is not available.
    /// See [`BoltDaemon::connect`].
    pub async fn build(settings: Settings) -> Result<Self> {
        let daemon = BoltDaemon::connect(&settings).await?;
        let mut registry = DeviceRegistry::new(Arc::new(daemon), settings.policy);
        registry.initialize().await?;
        debug!(devices = registry.len(), "device registry initialized");

        Ok(Self { registry, settings })
    }

    /// Spawns the task that keeps the registry in sync with the daemon. The task
    /// ends with [`crate::Error::Disconnected`] once the daemon goes away.
    pub fn run(self) -> (RegistryHandle, JoinHandle<Result<()>>) {
        let handle = self.registry.handle();
        (handle, tokio::spawn(self.registry.run()))
    }
}
