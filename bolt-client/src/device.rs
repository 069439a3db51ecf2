//! Typed mirror of the state the bolt daemon keeps for each device.

use std::{fmt, str::FromStr};

use tracing::warn;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use crate::error::InvalidState;

/// Object path of a device on the bus. Unique among live devices and used as
/// the registry key.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::From,
)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DevicePath {
    fn from(path: &str) -> Self {
        Self(path.to_owned())
    }
}

impl From<OwnedObjectPath> for DevicePath {
    fn from(path: OwnedObjectPath) -> Self {
        Self(path.as_str().to_owned())
    }
}

impl From<&ObjectPath<'_>> for DevicePath {
    fn from(path: &ObjectPath<'_>) -> Self {
        Self(path.as_str().to_owned())
    }
}

/// Thunderbolt controller generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Thunderbolt1,
    Thunderbolt2,
    Thunderbolt3,
    Usb4,
}

impl TryFrom<u32> for Generation {
    type Error = InvalidState;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Thunderbolt1),
            2 => Ok(Self::Thunderbolt2),
            3 => Ok(Self::Thunderbolt3),
            4 => Ok(Self::Usb4),
            other => Err(InvalidState::Generation(other)),
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thunderbolt1 => f.write_str("Thunderbolt 1"),
            Self::Thunderbolt2 => f.write_str("Thunderbolt 2"),
            Self::Thunderbolt3 => f.write_str("Thunderbolt 3"),
            Self::Usb4 => f.write_str("USB4"),
        }
    }
}

/// Connection and authorization status as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Unknown,
    Disconnected,
    Connecting,
    Connected,
    Authorizing,
    AuthError,
    Authorized,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authorizing => "authorizing",
            Self::AuthError => "auth-error",
            Self::Authorized => "authorized",
        }
    }

    /// Whether the device is attached, regardless of its authorization.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Authorizing | Self::Authorized)
    }

    /// Parses the daemon's status string. Values this client does not know
    /// about are mapped to [`Status::Unknown`].
    pub fn from_dbus(value: &str) -> Self {
        value.parse().unwrap_or_else(|()| {
            warn!(status = value, "unexpected device status from bolt daemon");
            Self::Unknown
        })
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "unknown" => Self::Unknown,
            "disconnected" => Self::Disconnected,
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "authorizing" => Self::Authorizing,
            "auth-error" => Self::AuthError,
            "authorized" => Self::Authorized,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Host,
    Peripheral,
    Unknown,
}

impl DeviceType {
    pub fn from_dbus(value: &str) -> Self {
        match value {
            "host" => Self::Host,
            "peripheral" => Self::Peripheral,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Peripheral => "peripheral",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization policy passed along with authorize and enroll requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Policy {
    Default,
    Manual,
    #[default]
    Auto,
    Iommu,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Iommu => "iommu",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiated link speed, per direction. Speeds are in Gb/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkSpeed {
    pub rx_speed: u32,
    pub rx_lanes: u32,
    pub tx_speed: u32,
    pub tx_lanes: u32,
}

impl LinkSpeed {
    /// Human readable transmit bandwidth, e.g. `40 Gb/s (2 lanes @ 20 Gb/s)`.
    pub fn bandwidth(&self) -> String {
        let Self {
            tx_speed, tx_lanes, ..
        } = *self;
        format!(
            "{} Gb/s ({tx_lanes} lanes @ {tx_speed} Gb/s)",
            u64::from(tx_lanes) * u64::from(tx_speed)
        )
    }
}

/// Everything read from a device object when it is discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceType,
    pub uid: String,
    pub generation: Generation,
    pub status: Status,
    pub stored: bool,
    pub link_speed: LinkSpeed,
}

/// The subset of a `PropertiesChanged` notification this client cares about.
/// Fields that were not part of the notification are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceChanges {
    pub status: Option<Status>,
    pub stored: Option<bool>,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.stored.is_none()
    }
}
