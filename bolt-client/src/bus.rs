//! The seam between device bookkeeping and the bus. [`crate::daemon::BoltDaemon`]
//! talks to the real daemon; tests use the generated `MockBoltBus`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    device::{DeviceChanges, DeviceInfo, DevicePath, Policy},
    error::Result,
};

pub type SharedBus = Arc<dyn BoltBus>;

/// Device lifecycle signals emitted by the manager object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerSignal {
    DeviceAdded(DevicePath),
    DeviceRemoved(DevicePath),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BoltBus: Send + Sync + 'static {
    async fn list_devices(&self) -> Result<Vec<DevicePath>>;

    /// Subscribes to `DeviceAdded`/`DeviceRemoved`.
    async fn manager_signals(&self) -> Result<BoxStream<'static, ManagerSignal>>;

    /// Reads and decodes every property of the device at `path`.
    async fn device(&self, path: &DevicePath) -> Result<DeviceInfo>;

    /// Subscribes to property changes of the device at `path`.
    async fn device_changes(
        &self,
        path: &DevicePath,
    ) -> Result<BoxStream<'static, DeviceChanges>>;

    async fn authorize(&self, path: &DevicePath, policy: Policy) -> Result<()>;

    async fn enroll_device(&self, uid: &str, policy: Policy, flags: &str) -> Result<()>;

    async fn forget_device(&self, uid: &str) -> Result<()>;
}
