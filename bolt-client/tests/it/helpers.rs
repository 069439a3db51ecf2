use std::{collections::HashMap, io, time::Duration};

use bolt_client::{
    registry::RegistryEvent,
    session::SessionState,
    startup::{Application, Settings},
};
use bolt_dbus::{MANAGER_PATH, SERVICE};
use dbus_launch::{BusType, Daemon};
use once_cell::sync::Lazy;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use zbus::{
    fdo, interface,
    zvariant::{ObjectPath, OwnedObjectPath},
    Connection, ObjectServer, SignalContext,
};

pub const DOCK_PATH: &str = "/org/freedesktop/bolt/devices/dock";
pub const HOST_PATH: &str = "/org/freedesktop/bolt/devices/host";
pub const DISPLAY_PATH: &str = "/org/freedesktop/bolt/devices/display";

const WAIT: Duration = Duration::from_secs(5);

static TRACING: Lazy<()> = Lazy::new(|| {
    let _flusher = bolt_client::telemetry::TelemetryConfig::new().init();
});

pub fn launch_system_dbus() -> JoinHandle<io::Result<Daemon>> {
    tokio::task::spawn_blocking(|| {
        dbus_launch::Launcher::daemon()
            .bus_type(BusType::System)
            .launch()
    })
}

pub fn make_settings(dbus: &Daemon) -> Settings {
    Settings {
        dbus_address: dbus.address().to_string().into(),
        call_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub async fn build_application(settings: Settings) -> bolt_client::Result<Application> {
    Lazy::force(&TRACING);
    Application::build(settings).await
}

pub async fn next_event(events: &mut broadcast::Receiver<RegistryEvent>) -> RegistryEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a registry event")
        .expect("registry event channel closed")
}

pub async fn wait_for_state(
    state: &mut watch::Receiver<SessionState>,
    done: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    *tokio::time::timeout(WAIT, state.wait_for(done))
        .await
        .expect("timed out waiting for a state change")
        .expect("session went away")
}

pub struct FakeDevice {
    pub name: String,
    pub vendor: String,
    pub kind: String,
    pub uid: String,
    pub generation: u32,
    pub status: String,
    pub stored: bool,
    /// How long `Authorize` takes to answer.
    pub authorize_delay: Duration,
}

impl FakeDevice {
    pub fn peripheral(uid: &str, status: &str, stored: bool) -> Self {
        Self {
            name: "Dock".into(),
            vendor: "Acme".into(),
            kind: "peripheral".into(),
            uid: uid.into(),
            generation: 4,
            status: status.into(),
            stored,
            authorize_delay: Duration::ZERO,
        }
    }

    pub fn host() -> Self {
        Self {
            kind: "host".into(),
            ..Self::peripheral("host", "authorized", false)
        }
    }
}

#[interface(name = "org.freedesktop.bolt1.Device")]
impl FakeDevice {
    async fn authorize(
        &mut self,
        flags: String,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
    ) -> fdo::Result<()> {
        tracing::debug!(uid = self.uid, flags, "Authorize called");
        tokio::time::sleep(self.authorize_delay).await;
        if self.status != "connected" {
            return Err(fdo::Error::Failed(format!("wrong status: {}", self.status)));
        }
        self.status = "authorized".into();
        self.status_changed(&ctxt).await?;
        Ok(())
    }

    #[zbus(property)]
    async fn name(&self) -> String {
        self.name.clone()
    }

    #[zbus(property)]
    async fn vendor(&self) -> String {
        self.vendor.clone()
    }

    #[zbus(property, name = "Type")]
    async fn device_type(&self) -> String {
        self.kind.clone()
    }

    #[zbus(property)]
    async fn uid(&self) -> String {
        self.uid.clone()
    }

    #[zbus(property)]
    async fn generation(&self) -> u32 {
        self.generation
    }

    #[zbus(property)]
    async fn status(&self) -> String {
        self.status.clone()
    }

    #[zbus(property)]
    async fn stored(&self) -> bool {
        self.stored
    }

    #[zbus(property)]
    async fn link_speed(&self) -> HashMap<String, u32> {
        HashMap::from([
            ("rx.speed".to_owned(), 20),
            ("rx.lanes".to_owned(), 2),
            ("tx.speed".to_owned(), 20),
            ("tx.lanes".to_owned(), 2),
        ])
    }
}

#[derive(Default)]
pub struct FakeManager {
    /// uid -> object path
    devices: Vec<(String, OwnedObjectPath)>,
}

impl FakeManager {
    fn path_of(&self, uid: &str) -> fdo::Result<OwnedObjectPath> {
        self.devices
            .iter()
            .find(|(known, _)| known == uid)
            .map(|(_, path)| path.clone())
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("no device {uid}")))
    }
}

#[interface(name = "org.freedesktop.bolt1.Manager")]
impl FakeManager {
    async fn list_devices(&self) -> Vec<OwnedObjectPath> {
        self.devices.iter().map(|(_, path)| path.clone()).collect()
    }

    async fn enroll_device(
        &self,
        uid: String,
        policy: String,
        flags: String,
        #[zbus(object_server)] server: &ObjectServer,
    ) -> fdo::Result<OwnedObjectPath> {
        tracing::debug!(uid, policy, flags, "EnrollDevice called");
        let path = self.path_of(&uid)?;
        let device = server.interface::<_, FakeDevice>(path.clone()).await?;
        let mut iface = device.get_mut().await;
        iface.stored = true;
        iface.stored_changed(device.signal_context()).await?;
        if iface.status == "connected" {
            iface.status = "authorized".into();
            iface.status_changed(device.signal_context()).await?;
        }
        Ok(path)
    }

    async fn forget_device(
        &self,
        uid: String,
        #[zbus(object_server)] server: &ObjectServer,
    ) -> fdo::Result<()> {
        tracing::debug!(uid, "ForgetDevice called");
        let path = self.path_of(&uid)?;
        let device = server.interface::<_, FakeDevice>(path.clone()).await?;
        let mut iface = device.get_mut().await;
        iface.stored = false;
        iface.stored_changed(device.signal_context()).await?;
        Ok(())
    }

    #[zbus(signal)]
    async fn device_added(
        ctxt: &SignalContext<'_>,
        device: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn device_removed(
        ctxt: &SignalContext<'_>,
        device: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    #[zbus(property)]
    async fn version(&self) -> u32 {
        1
    }
}

/// A fake `boltd` owning the daemon's well-known name on `dbus`.
pub struct FakeBolt {
    pub conn: Connection,
}

impl FakeBolt {
    pub async fn start(dbus: &Daemon) -> zbus::Result<Self> {
        let conn = zbus::ConnectionBuilder::address(dbus.address())?
            .name(SERVICE)?
            .serve_at(MANAGER_PATH, FakeManager::default())?
            .build()
            .await?;
        Ok(Self { conn })
    }

    /// Exports the device without announcing it.
    pub async fn insert(&self, path: &str, device: FakeDevice) -> zbus::Result<()> {
        let uid = device.uid.clone();
        self.conn.object_server().at(path, device).await?;
        let manager = self
            .conn
            .object_server()
            .interface::<_, FakeManager>(MANAGER_PATH)
            .await?;
        manager
            .get_mut()
            .await
            .devices
            .push((uid, OwnedObjectPath::try_from(path)?));
        Ok(())
    }

    pub async fn plug(&self, path: &str, device: FakeDevice) -> zbus::Result<()> {
        self.insert(path, device).await?;
        FakeManager::device_added(
            &SignalContext::new(&self.conn, MANAGER_PATH)?,
            ObjectPath::try_from(path)?,
        )
        .await
    }

    pub async fn unplug(&self, path: &str) -> zbus::Result<()> {
        self.conn
            .object_server()
            .remove::<FakeDevice, _>(path)
            .await?;
        let manager = self
            .conn
            .object_server()
            .interface::<_, FakeManager>(MANAGER_PATH)
            .await?;
        manager
            .get_mut()
            .await
            .devices
            .retain(|(_, known)| known.as_str() != path);
        FakeManager::device_removed(
            &SignalContext::new(&self.conn, MANAGER_PATH)?,
            ObjectPath::try_from(path)?,
        )
        .await
    }

    /// Changes the status the way the daemon would after a replug.
    pub async fn set_status(&self, path: &str, status: &str) -> zbus::Result<()> {
        let device = self
            .conn
            .object_server()
            .interface::<_, FakeDevice>(path)
            .await?;
        let mut iface = device.get_mut().await;
        iface.status = status.into();
        iface.status_changed(device.signal_context()).await
    }
}
