use std::time::Duration;

use crate::device::DevicePath;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The daemon (or the bus itself) could not be reached.
    #[error("failed to connect to the bolt daemon")]
    Connection(#[source] zbus::Error),
    /// The device object vanished or never existed.
    #[error("device object `{path}` is unreachable")]
    DeviceUnreachable {
        path: DevicePath,
        #[source]
        source: zbus::Error,
    },
    #[error("remote call `{method}` failed")]
    Call {
        method: &'static str,
        #[source]
        source: zbus::Error,
    },
    #[error("remote call `{method}` timed out after {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },
    #[error("failed to decode property `{property}`")]
    Decode {
        property: &'static str,
        #[source]
        source: zbus::zvariant::Error,
    },
    #[error("property `{0}` is missing")]
    MissingProperty(&'static str),
    #[error(transparent)]
    InvalidState(#[from] InvalidState),
    #[error("no managed device `{0}`")]
    UnknownDevice(String),
    #[error("the bolt daemon stopped emitting manager signals")]
    Disconnected,
}

impl Error {
    /// Whether the daemon or the targeted object could not be reached.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::DeviceUnreachable { .. } | Error::Timeout { .. }
        )
    }
}

/// The daemon reported, or the caller requested, something that is not valid for
/// the current device state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidState {
    #[error("undefined thunderbolt generation {0}")]
    Generation(u32),
    #[error("device `{uid}` is already trusted")]
    AlreadyTrusted { uid: String },
    #[error("device `{uid}` is not trusted")]
    NotTrusted { uid: String },
}
