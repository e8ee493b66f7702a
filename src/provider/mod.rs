//! Device provider traits and bundled implementations.
//!
//! A [`DeviceProvider`] is the engine's only source of truth about fleet
//! membership. It emits an ordered, unbounded stream of connect and
//! disconnect events; closing the stream signals that no further devices
//! will ever arrive. The provider must not emit a second `Connected` for
//! the same serial without an intervening `Disconnected`.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::device::DynDevice;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur while subscribing to a provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider already subscribed; the event stream can be consumed once")]
    AlreadySubscribed,

    #[error("Provider-specific error: {0}")]
    Other(#[from] anyhow::Error),
}

/// A fleet membership event.
#[derive(Clone)]
pub enum DeviceEvent {
    /// A device joined the fleet and is ready for work.
    Connected(DynDevice),
    /// The device with this serial left the fleet.
    Disconnected(String),
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Connected(d) => f.debug_tuple("Connected").field(&d.serial()).finish(),
            DeviceEvent::Disconnected(s) => f.debug_tuple("Disconnected").field(s).finish(),
        }
    }
}

/// Source of device connect/disconnect events.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Take the event stream. Can be consumed exactly once per run.
    async fn subscribe(&self) -> ProviderResult<mpsc::UnboundedReceiver<DeviceEvent>>;

    /// Provider name, for logging.
    fn name(&self) -> &'static str;
}

/// Provider for a fixed fleet known up front.
///
/// Emits one `Connected` per device in order, then closes the stream.
/// Useful for CI farms with a static device list and for tests.
pub struct StaticProvider {
    devices: Mutex<Vec<DynDevice>>,
}

impl StaticProvider {
    /// Create a provider over a fixed set of devices.
    pub fn new(devices: Vec<DynDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }
}

#[async_trait]
impl DeviceProvider for StaticProvider {
    async fn subscribe(&self) -> ProviderResult<mpsc::UnboundedReceiver<DeviceEvent>> {
        let mut devices = self.devices.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        for device in devices.drain(..) {
            // Receiver is alive in this scope, sends cannot fail.
            let _ = tx.send(DeviceEvent::Connected(device));
        }
        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Provider fed by the embedding application at runtime.
///
/// The application keeps the [`FleetHandle`] and pushes events as its
/// discovery transport (adb track-devices, mDNS, a cloud API) observes
/// them. Dropping the handle closes the stream.
pub struct ChannelProvider {
    rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
}

/// Sending side of a [`ChannelProvider`].
#[derive(Clone)]
pub struct FleetHandle {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl FleetHandle {
    /// Announce a newly connected device.
    pub fn connect(&self, device: DynDevice) {
        let _ = self.tx.send(DeviceEvent::Connected(device));
    }

    /// Announce that the device with this serial disconnected.
    pub fn disconnect(&self, serial: impl Into<String>) {
        let _ = self.tx.send(DeviceEvent::Disconnected(serial.into()));
    }
}

impl ChannelProvider {
    /// Create a provider and the handle that feeds it.
    pub fn new() -> (Self, FleetHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            FleetHandle { tx },
        )
    }
}

#[async_trait]
impl DeviceProvider for ChannelProvider {
    async fn subscribe(&self) -> ProviderResult<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.rx
            .lock()
            .await
            .take()
            .ok_or(ProviderError::AlreadySubscribed)
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
