//! Discovered devices and their endpoints.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::models::{BluetoothAddress, DeviceIdentity, EndpointDescriptor};

/// In-memory map of devices to the endpoints found on them.
///
/// Devices are kept in discovery order, endpoints in the order they were
/// recorded. Duplicate endpoint URLs are kept as reported.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    index: HashMap<BluetoothAddress, usize>,
}

#[derive(Debug)]
struct Entry {
    device: DeviceIdentity,
    endpoints: Vec<EndpointDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `device` with no endpoints. Returns `false` if it was already
    /// present, in which case nothing changes.
    pub fn record_device(&mut self, device: DeviceIdentity) -> bool {
        if self.index.contains_key(&device.address()) {
            return false;
        }
        self.index.insert(device.address(), self.entries.len());
        self.entries.push(Entry {
            device,
            endpoints: Vec::new(),
        });
        true
    }

    /// Append `endpoint` to `device`'s list. Endpoints for unknown devices
    /// are dropped and `false` is returned.
    pub fn record_endpoint(
        &mut self,
        device: &DeviceIdentity,
        endpoint: EndpointDescriptor,
    ) -> bool {
        match self.index.get(&device.address()) {
            Some(&i) => {
                self.entries[i].endpoints.push(endpoint);
                true
            }
            None => {
                debug!(
                    "Dropping endpoint {} for unrecorded device {}",
                    endpoint.url,
                    device.address()
                );
                false
            }
        }
    }

    pub fn list_devices(&self) -> Vec<DeviceIdentity> {
        self.entries.iter().map(|e| e.device.clone()).collect()
    }

    pub fn list_endpoints(&self, device: &DeviceIdentity) -> Vec<EndpointDescriptor> {
        self.entry(device)
            .map(|e| e.endpoints.clone())
            .unwrap_or_default()
    }

    pub fn endpoint_count(&self, device: &DeviceIdentity) -> usize {
        self.entry(device).map(|e| e.endpoints.len()).unwrap_or(0)
    }

    pub fn contains(&self, device: &DeviceIdentity) -> bool {
        self.index.contains_key(&device.address())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, device: &DeviceIdentity) -> Option<&Entry> {
        self.index
            .get(&device.address())
            .map(|&i| &self.entries[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(n: u64) -> DeviceIdentity {
        DeviceIdentity::new(BluetoothAddress::from(n))
    }

    #[test]
    fn test_record_device_is_idempotent() {
        let mut registry = Registry::new();
        assert!(registry.record_device(device(1)));
        assert!(!registry.record_device(DeviceIdentity::with_name(
            BluetoothAddress::from(1),
            "renamed"
        )));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_devices()[0].name(), None);
    }

    #[test]
    fn test_devices_listed_in_discovery_order() {
        let mut registry = Registry::new();
        for n in [5, 3, 9] {
            registry.record_device(device(n));
        }
        let order: Vec<u64> = registry
            .list_devices()
            .iter()
            .map(|d| d.address().into())
            .collect();
        assert_eq!(order, vec![5, 3, 9]);
    }

    #[test]
    fn test_endpoints_keep_recording_order_and_duplicates() {
        let mut registry = Registry::new();
        let d = device(7);
        registry.record_device(d.clone());
        for url in ["conn://X:5", "conn://X:1", "conn://X:5"] {
            assert!(registry.record_endpoint(&d, EndpointDescriptor::new(url, d.address())));
        }
        let urls: Vec<String> = registry
            .list_endpoints(&d)
            .into_iter()
            .map(|e| e.url)
            .collect();
        assert_eq!(urls, vec!["conn://X:5", "conn://X:1", "conn://X:5"]);
        assert_eq!(registry.endpoint_count(&d), 3);
    }

    #[test]
    fn test_endpoint_for_unknown_device_is_dropped() {
        let mut registry = Registry::new();
        registry.record_device(device(1));
        let stranger = device(2);
        assert!(!registry.record_endpoint(
            &stranger,
            EndpointDescriptor::new("conn://Y:3", stranger.address())
        ));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&stranger));
        assert!(registry.list_endpoints(&stranger).is_empty());
        assert_eq!(registry.endpoint_count(&device(1)), 0);
    }
}
