//! See <https://gitlab.freedesktop.org/bolt/bolt/-/tree/master/dbus>
//!
//! To poke at the daemon by hand:
//!
//! ```shell
//! $ busctl introspect \
//!     org.freedesktop.bolt \
//!     /org/freedesktop/bolt \
//!     org.freedesktop.bolt1.Manager
//! $ busctl call \
//!     org.freedesktop.bolt \
//!     /org/freedesktop/bolt \
//!     org.freedesktop.bolt1.Manager ListDevices
//! $ busctl get-property \
//!     org.freedesktop.bolt \
//!     /org/freedesktop/bolt/devices/<uid> \
//!     org.freedesktop.bolt1.Device Status
//! ```
#![forbid(unsafe_code)]

use std::collections::HashMap;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};

pub const SERVICE: &str = "org.freedesktop.bolt";
pub const DEVICE_IFACE: &str = "org.freedesktop.bolt1.Device";
pub const MANAGER_PATH: &str = "/org/freedesktop/bolt";

#[zbus::proxy(
    interface = "org.freedesktop.bolt1.Manager",
    default_service = "org.freedesktop.bolt",
    default_path = "/org/freedesktop/bolt",
    gen_async = true,
    gen_blocking = false
)]
pub trait Manager {
    fn list_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    /// Authorizes the device and stores it in the daemon's database, so that it
    /// gets authorized automatically on the next connection.
    fn enroll_device(
        &self,
        uid: &str,
        policy: &str,
        flags: &str,
    ) -> zbus::Result<OwnedObjectPath>;

    fn forget_device(&self, uid: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn device_added(&self, device: ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    fn device_removed(&self, device: ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(property)]
    fn version(&self) -> zbus::Result<u32>;
}

#[zbus::proxy(
    interface = "org.freedesktop.bolt1.Device",
    default_service = "org.freedesktop.bolt",
    gen_async = true,
    gen_blocking = false
)]
pub trait Device {
    /// `flags` is the authorization policy, e.g. `"auto"`.
    fn authorize(&self, flags: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn vendor(&self) -> zbus::Result<String>;

    /// One of `host`, `peripheral` or `unknown`.
    #[zbus(property, name = "Type")]
    fn device_type(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn uid(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn generation(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn status(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn stored(&self) -> zbus::Result<bool>;

    /// `a{su}` keyed by `rx.speed`, `rx.lanes`, `tx.speed` and `tx.lanes`.
    #[zbus(property)]
    fn link_speed(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
}
