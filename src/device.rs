//! Device identity and the registry contract the router consults to resolve
//! device-scoped routes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AdbError, AdbResult};

/// State of a device as reported by `host:devices`/`host:devices-l`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Device,
    Offline,
    Recovery,
    Bootloader,
    Unauthorized,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Device => "device",
            DeviceState::Offline => "offline",
            DeviceState::Recovery => "recovery",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Unauthorized => "unauthorized",
        };
        write!(f, "{s}")
    }
}

/// A device the registry knows about. Sessions hold only a serial reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub serial: String,
    pub state: DeviceState,
    pub properties: BTreeMap<String, String>,
    pub features: Vec<String>,
}

impl Device {
    pub fn new(serial: impl Into<String>, state: DeviceState) -> Self {
        let serial = serial.into();
        Device {
            id: serial.clone(),
            serial,
            state,
            properties: BTreeMap::new(),
            features: Vec::new(),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Process-wide device map plus per-session device selection.
///
/// `list()` must be stable for the duration of a request; `select` fails if
/// `serial` is unknown, and `select(session_id, None)` picks the only device
/// when exactly one exists.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list(&self) -> Vec<Device>;
    async fn get(&self, serial: &str) -> Option<Device>;
    async fn get_selected(&self, session_id: &str) -> Option<Device>;
    async fn select(&self, session_id: &str, serial: Option<&str>) -> AdbResult<()>;
}

/// Default in-memory `DeviceRegistry`, generalized from a single fixed device
/// to an arbitrary map so embedders can simulate fleets.
#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<BTreeMap<String, Device>>,
    selections: RwLock<BTreeMap<String, String>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, device: Device) {
        self.devices.write().await.insert(device.serial.clone(), device);
    }

    pub async fn remove(&self, serial: &str) {
        self.devices.write().await.remove(serial);
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn list(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    async fn get(&self, serial: &str) -> Option<Device> {
        self.devices.read().await.get(serial).cloned()
    }

    async fn get_selected(&self, session_id: &str) -> Option<Device> {
        let serial = self.selections.read().await.get(session_id).cloned()?;
        self.get(&serial).await
    }

    async fn select(&self, session_id: &str, serial: Option<&str>) -> AdbResult<()> {
        let devices = self.devices.read().await;
        let resolved = match serial {
            Some(s) => {
                if !devices.contains_key(s) {
                    return Err(AdbError::DeviceNotFound(s.to_string()));
                }
                s.to_string()
            }
            None => {
                if devices.len() == 1 {
                    devices.keys().next().cloned().unwrap()
                } else {
                    return Err(AdbError::NoDeviceAvailable);
                }
            }
        };
        drop(devices);
        self.selections
            .write()
            .await
            .insert(session_id.to_string(), resolved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_list() {
        let reg = InMemoryDeviceRegistry::new();
        reg.insert(Device::new("fake-5554", DeviceState::Device)).await;
        reg.insert(Device::new("fake-5555", DeviceState::Offline)).await;
        let mut devices = reg.list().await;
        devices.sort_by(|a, b| a.serial.cmp(&b.serial));
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "fake-5554");
        assert_eq!(devices[1].state, DeviceState::Offline);
    }

    #[tokio::test]
    async fn test_select_unknown_serial_fails() {
        let reg = InMemoryDeviceRegistry::new();
        reg.insert(Device::new("fake-5554", DeviceState::Device)).await;
        let err = reg.select("s1", Some("nope")).await.unwrap_err();
        assert!(matches!(err, AdbError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_select_none_picks_sole_device() {
        let reg = InMemoryDeviceRegistry::new();
        reg.insert(Device::new("fake-5554", DeviceState::Device)).await;
        reg.select("s1", None).await.unwrap();
        let selected = reg.get_selected("s1").await.unwrap();
        assert_eq!(selected.serial, "fake-5554");
    }

    #[tokio::test]
    async fn test_select_none_ambiguous_fails() {
        let reg = InMemoryDeviceRegistry::new();
        reg.insert(Device::new("fake-5554", DeviceState::Device)).await;
        reg.insert(Device::new("fake-5555", DeviceState::Device)).await;
        let err = reg.select("s1", None).await.unwrap_err();
        assert!(matches!(err, AdbError::NoDeviceAvailable));
    }

    #[tokio::test]
    async fn test_get_selected_absent() {
        let reg = InMemoryDeviceRegistry::new();
        assert!(reg.get_selected("nope").await.is_none());
    }

    #[test]
    fn test_device_state_display() {
        assert_eq!(DeviceState::Device.to_string(), "device");
        assert_eq!(DeviceState::Bootloader.to_string(), "bootloader");
    }
}
