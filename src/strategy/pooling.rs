//! Device-to-pool association.

use crate::device::Device;

/// Opaque pool identifier produced by a pooling strategy.
///
/// Stable for the lifetime of a device-to-pool association within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePoolId(pub String);

impl DevicePoolId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DevicePoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps each device to the pool that will own it.
///
/// Must be deterministic for a given device identity within one run.
pub trait PoolingStrategy: Send + Sync {
    fn associate(&self, device: &dyn Device) -> DevicePoolId;
}

/// Every device lands in one shared pool.
///
/// The default: the whole fleet cooperates on a single corpus.
pub struct OmniPooling;

impl PoolingStrategy for OmniPooling {
    fn associate(&self, _device: &dyn Device) -> DevicePoolId {
        DevicePoolId::new("omni")
    }
}

/// One pool per device serial.
///
/// Each device runs the full corpus independently, e.g. to compare
/// behavior across hardware revisions.
pub struct PerDevicePooling;

impl PoolingStrategy for PerDevicePooling {
    fn associate(&self, device: &dyn Device) -> DevicePoolId {
        DevicePoolId::new(device.serial())
    }
}
