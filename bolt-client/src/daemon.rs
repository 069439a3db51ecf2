//! [`BoltBus`] over a zbus connection to `boltd`.

use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use bolt_dbus::{DeviceProxy, ManagerProxy, DEVICE_IFACE};
use futures::{stream::BoxStream, StreamExt as _};
use tracing::{debug, info, warn};
use zbus::{
    fdo::{PropertiesChanged, PropertiesProxy},
    zvariant::{self, ObjectPath, OwnedValue},
    CacheProperties, Connection, ConnectionBuilder,
};

use crate::{
    bus::{BoltBus, ManagerSignal},
    device::{
        DeviceChanges, DeviceInfo, DevicePath, DeviceType, Generation, LinkSpeed,
        Policy, Status,
    },
    error::{Error, Result},
    startup::Settings,
};

pub struct BoltDaemon {
    conn: Connection,
    manager: ManagerProxy<'static>,
    well_known_name: String,
    call_timeout: Duration,
}

impl BoltDaemon {
    /// Connects to the bus and makes sure the daemon answers.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the bus cannot be reached or nobody owns the
    /// daemon's well-known name, [`Error::Timeout`] if the daemon does not answer
    /// within [`Settings::call_timeout`].
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let builder = if let Some(address) = settings.dbus_address.as_deref() {
            ConnectionBuilder::address(address)
        } else {
            ConnectionBuilder::system()
        }
        .map_err(Error::Connection)?;
        let conn = builder.build().await.map_err(Error::Connection)?;
        debug!(
            unique_bus_name = ?conn.unique_name(),
            "connected to dbus",
        );

        Self::with_connection(conn, settings).await
    }

    pub async fn with_connection(conn: Connection, settings: &Settings) -> Result<Self> {
        let manager = ManagerProxy::builder(&conn)
            .cache_properties(CacheProperties::No)
            .destination(settings.well_known_name.clone())
            .and_then(|b| b.path(settings.manager_object_path.clone()))
            .map_err(Error::Connection)?
            .build()
            .await
            .map_err(Error::Connection)?;

        let daemon = Self {
            conn,
            manager,
            well_known_name: settings.well_known_name.clone(),
            call_timeout: settings.call_timeout,
        };

        let version = daemon
            .timed("Version", daemon.manager.version())
            .await
            .map_err(|err| match err {
                Error::Call { source, .. } => Error::Connection(source),
                other => other,
            })?;
        info!(version, "bolt daemon is available");

        Ok(daemon)
    }

    async fn timed<T>(
        &self,
        method: &'static str,
        call: impl Future<Output = zbus::Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| Error::Timeout {
                method,
                timeout: self.call_timeout,
            })?
            .map_err(|source| Error::Call { method, source })
    }

    async fn device_proxy(&self, path: &DevicePath) -> Result<DeviceProxy<'static>> {
        let unreachable = |source| Error::DeviceUnreachable {
            path: path.clone(),
            source,
        };
        DeviceProxy::builder(&self.conn)
            .cache_properties(CacheProperties::No)
            .destination(self.well_known_name.clone())
            .and_then(|b| b.path(object_path(path)?))
            .map_err(unreachable)?
            .build()
            .await
            .map_err(unreachable)
    }
}

#[async_trait]
impl BoltBus for BoltDaemon {
    async fn list_devices(&self) -> Result<Vec<DevicePath>> {
        let paths = self
            .timed("ListDevices", self.manager.list_devices())
            .await?;
        Ok(paths.into_iter().map(DevicePath::from).collect())
    }

    async fn manager_signals(&self) -> Result<BoxStream<'static, ManagerSignal>> {
        let added = self
            .manager
            .receive_device_added()
            .await
            .map_err(Error::Connection)?
            .filter_map(|signal| async move {
                signal
                    .args()
                    .map(|args| ManagerSignal::DeviceAdded(args.device().into()))
                    .map_err(|err| warn!("failed to parse DeviceAdded args: {err:?}"))
                    .ok()
            });
        let removed = self
            .manager
            .receive_device_removed()
            .await
            .map_err(Error::Connection)?
            .filter_map(|signal| async move {
                signal
                    .args()
                    .map(|args| ManagerSignal::DeviceRemoved(args.device().into()))
                    .map_err(|err| warn!("failed to parse DeviceRemoved args: {err:?}"))
                    .ok()
            });

        Ok(futures::stream::select(added, removed).boxed())
    }

    async fn device(&self, path: &DevicePath) -> Result<DeviceInfo> {
        let proxy = self.device_proxy(path).await?;
        let read = async {
            Ok::<_, zbus::Error>(RawDevice {
                name: proxy.name().await?,
                vendor: proxy.vendor().await?,
                kind: proxy.device_type().await?,
                uid: proxy.uid().await?,
                generation: proxy.generation().await?,
                status: proxy.status().await?,
                stored: proxy.stored().await?,
                link_speed: proxy.link_speed().await?,
            })
        };
        let raw = tokio::time::timeout(self.call_timeout, read)
            .await
            .map_err(|_| Error::Timeout {
                method: "GetAll",
                timeout: self.call_timeout,
            })?
            .map_err(|source| Error::DeviceUnreachable {
                path: path.clone(),
                source,
            })?;

        raw.decode()
    }

    async fn device_changes(
        &self,
        path: &DevicePath,
    ) -> Result<BoxStream<'static, DeviceChanges>> {
        let unreachable = |source| Error::DeviceUnreachable {
            path: path.clone(),
            source,
        };
        let props = PropertiesProxy::builder(&self.conn)
            .destination(self.well_known_name.clone())
            .and_then(|b| b.path(object_path(path)?))
            .map_err(unreachable)?
            .build()
            .await
            .map_err(unreachable)?;
        let signals = props
            .receive_properties_changed()
            .await
            .map_err(unreachable)?;

        let path = path.clone();
        Ok(signals
            .filter_map(move |signal| {
                let changes = changes_from_signal(&path, &signal);
                async move { changes }
            })
            .boxed())
    }

    async fn authorize(&self, path: &DevicePath, policy: Policy) -> Result<()> {
        let proxy = self.device_proxy(path).await?;
        self.timed("Authorize", proxy.authorize(policy.as_str()))
            .await
    }

    async fn enroll_device(&self, uid: &str, policy: Policy, flags: &str) -> Result<()> {
        let device = self
            .timed(
                "EnrollDevice",
                self.manager.enroll_device(uid, policy.as_str(), flags),
            )
            .await?;
        debug!(uid, ?device, "enrolled device");
        Ok(())
    }

    async fn forget_device(&self, uid: &str) -> Result<()> {
        self.timed("ForgetDevice", self.manager.forget_device(uid))
            .await
    }
}

fn object_path(path: &DevicePath) -> zbus::Result<ObjectPath<'static>> {
    ObjectPath::try_from(path.as_str().to_owned()).map_err(zbus::Error::from)
}

/// Device properties as they come off the bus, before validation.
struct RawDevice {
    name: String,
    vendor: String,
    kind: String,
    uid: String,
    generation: u32,
    status: String,
    stored: bool,
    link_speed: HashMap<String, OwnedValue>,
}

impl RawDevice {
    fn decode(self) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            generation: Generation::try_from(self.generation)?,
            link_speed: decode_link_speed(&self.link_speed)?,
            kind: DeviceType::from_dbus(&self.kind),
            status: Status::from_dbus(&self.status),
            name: self.name,
            vendor: self.vendor,
            uid: self.uid,
            stored: self.stored,
        })
    }
}

pub fn decode_link_speed(dbus: &HashMap<String, OwnedValue>) -> Result<LinkSpeed> {
    let required = |name| extract_prop::<u32>(dbus, name)?.ok_or(Error::MissingProperty(name));
    Ok(LinkSpeed {
        rx_speed: extract_prop(dbus, "rx.speed")?.unwrap_or_default(),
        rx_lanes: extract_prop(dbus, "rx.lanes")?.unwrap_or_default(),
        tx_speed: required("tx.speed")?,
        tx_lanes: required("tx.lanes")?,
    })
}

/// Picks `Status` and `Stored` out of a set of changed device properties.
/// Anything else is ignored. A field that fails to decode is logged and left
/// out without affecting the other one.
pub fn decode_changes(
    path: &DevicePath,
    dbus: &HashMap<String, OwnedValue>,
) -> DeviceChanges {
    fn field<T>(
        path: &DevicePath,
        dbus: &HashMap<String, OwnedValue>,
        name: &'static str,
    ) -> Option<T>
    where
        T: TryFrom<OwnedValue, Error = zvariant::Error>,
    {
        extract_prop(dbus, name)
            .map_err(|err| warn!(%path, "ignoring undecodable property change: {err:?}"))
            .ok()
            .flatten()
    }

    DeviceChanges {
        status: field::<String>(path, dbus, "Status")
            .map(|status| Status::from_dbus(&status)),
        stored: field(path, dbus, "Stored"),
    }
}

fn changes_from_signal(
    path: &DevicePath,
    signal: &PropertiesChanged,
) -> Option<DeviceChanges> {
    let args = signal
        .args()
        .map_err(|err| warn!(%path, "failed to parse PropertiesChanged args: {err:?}"))
        .ok()?;
    if args.interface_name().as_str() != DEVICE_IFACE {
        return None;
    }

    let changed = args
        .changed_properties()
        .iter()
        .map(|(name, value)| {
            Ok(((*name).to_owned(), OwnedValue::try_from(value.try_clone()?)?))
        })
        .collect::<Result<HashMap<_, _>, zvariant::Error>>()
        .map_err(|err| warn!(%path, "failed to copy changed properties: {err:?}"))
        .ok()?;

    Some(decode_changes(path, &changed)).filter(|changes| !changes.is_empty())
}

/// Extract a property named `prop_name` of type `T`.
/// Returns `Ok(None)` if the property doesn't exist, or `Err` if the conversion failed.
fn extract_prop<T>(
    dbus: &HashMap<String, OwnedValue>,
    prop_name: &'static str,
) -> Result<Option<T>>
where
    T: TryFrom<OwnedValue, Error = zvariant::Error>,
{
    let Some(prop) = dbus.get(prop_name) else {
        return Ok(None);
    };
    prop.try_clone()
        .and_then(T::try_from)
        .map(Some)
        .map_err(|source| Error::Decode {
            property: prop_name,
            source,
        })
}
