//! What a front end shows for a device. Everything in here is derived from the
//! device state and carries no state of its own.

use crate::device::{DeviceInfo, Status};

pub const TRUST_LABEL: &str = "Trust";
pub const FORGET_LABEL: &str = "Forget";

/// Status line and action availability for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    /// e.g. `Connected & Authorized, Trusted`.
    pub status_text: String,
    /// Label of the trust toggle: [`TRUST_LABEL`] or [`FORGET_LABEL`].
    pub trust_label: &'static str,
    pub authorize_enabled: bool,
    pub trust_enabled: bool,
}

impl Presentation {
    pub fn new(status: Status, stored: bool) -> Self {
        let connected = status.is_connected();

        let mut status_text =
            String::from(if connected { "Connected" } else { "Disconnected" });
        if status == Status::Authorized {
            status_text.push_str(" & Authorized");
        }
        let trust_label = if stored {
            status_text.push_str(", Trusted");
            FORGET_LABEL
        } else {
            TRUST_LABEL
        };

        // Authorizing is offered while the device is not connected, trusting only
        // while it is.
        Self {
            status_text,
            trust_label,
            authorize_enabled: !connected,
            trust_enabled: connected,
        }
    }
}

/// Static facts about a device, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDetails {
    /// `{vendor} {name}`
    pub title: String,
    pub generation: String,
    pub bandwidth: String,
    pub kind: String,
    pub uid: String,
}

impl DeviceDetails {
    pub fn new(info: &DeviceInfo) -> Self {
        Self {
            title: format!("{} {}", info.vendor, info.name),
            generation: info.generation.to_string(),
            bandwidth: info.link_speed.bandwidth(),
            kind: info.kind.to_string(),
            uid: info.uid.clone(),
        }
    }

    pub fn rows(&self) -> [(&'static str, &str); 4] {
        [
            ("Generation", self.generation.as_str()),
            ("Bandwidth", self.bandwidth.as_str()),
            ("Type", self.kind.as_str()),
            ("UID", self.uid.as_str()),
        ]
    }
}
