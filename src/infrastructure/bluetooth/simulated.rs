//! Simulated radio
//!
//! Replays a scripted set of devices and service records through the same
//! event sink a real stack would use, from background threads and with a
//! configurable delay between events.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::models::{
    BluetoothAddress, DeviceIdentity, InquiryStatus, SearchStatus, ServiceRecord, Uuid,
};
use crate::error::BluetoothError;
use crate::infrastructure::bluetooth::discovery::EventSink;
use crate::infrastructure::bluetooth::stack::{AccessCode, DiscoveryAgent, TransactionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_true")]
    pub inquiry_starts: bool,
    #[serde(default = "default_inquiry_status")]
    pub inquiry_status: InquiryStatus,
    #[serde(default)]
    pub devices: Vec<SimulatedDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub address: String,
    /// Answer to friendly-name queries; `None` makes the lookup fail.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub discoverable: bool,
    #[serde(default = "default_true")]
    pub reachable: bool,
    #[serde(default)]
    pub services: Vec<SimulatedService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedService {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Service class and protocol UUIDs carried by the record.
    #[serde(default = "default_service_classes")]
    pub uuids: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_inquiry_status() -> InquiryStatus {
    InquiryStatus::Completed
}
fn default_service_classes() -> Vec<String> {
    vec!["0003".to_string(), "0008".to_string(), "1105".to_string()]
}

impl Default for Scenario {
    fn default() -> Self {
        Self::demo()
    }
}

impl Scenario {
    /// A phone offering object push over RFCOMM and TCP, and a headset
    /// without anything connectable.
    pub fn demo() -> Self {
        Self {
            inquiry_starts: true,
            inquiry_status: InquiryStatus::Completed,
            devices: vec![
                SimulatedDevice {
                    address: "B8F9348D57DF".to_string(),
                    name: Some("Demo Phone".to_string()),
                    discoverable: true,
                    reachable: true,
                    services: vec![
                        SimulatedService {
                            url: Some(
                                "btgoep://B8F9348D57DF:12;authenticate=false;encrypt=false;master=false"
                                    .to_string(),
                            ),
                            name: Some("OBEX Object Push".to_string()),
                            uuids: default_service_classes(),
                        },
                        SimulatedService {
                            url: Some("tcpobex://127.0.0.1:6500".to_string()),
                            name: Some("OBEX over TCP".to_string()),
                            uuids: default_service_classes(),
                        },
                    ],
                },
                SimulatedDevice {
                    address: "001A7DDA7113".to_string(),
                    name: None,
                    discoverable: true,
                    reachable: true,
                    services: vec![SimulatedService {
                        url: None,
                        name: Some("Audio Sink".to_string()),
                        uuids: vec!["110B".to_string()],
                    }],
                },
            ],
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid scenario {}", path.display()))?;
        Ok(scenario)
    }
}

#[derive(Debug, Clone)]
struct Device {
    address: BluetoothAddress,
    name: Option<String>,
    discoverable: bool,
    reachable: bool,
    services: Vec<Service>,
}

#[derive(Debug, Clone)]
struct Service {
    url: Option<String>,
    name: Option<String>,
    uuids: Vec<Uuid>,
}

/// [`DiscoveryAgent`] backed by a [`Scenario`].
pub struct SimulatedRadio {
    inquiry_starts: bool,
    inquiry_status: InquiryStatus,
    devices: Arc<Vec<Device>>,
    event_delay: Duration,
    inquiry_cancelled: Arc<AtomicBool>,
    cancelled_searches: Arc<Mutex<HashSet<TransactionId>>>,
    next_transaction: AtomicU32,
}

impl SimulatedRadio {
    pub fn new(scenario: Scenario, event_delay: Duration) -> Result<Self, BluetoothError> {
        let devices = scenario
            .devices
            .into_iter()
            .map(|d| {
                let services = d
                    .services
                    .into_iter()
                    .map(|s| {
                        let uuids = s
                            .uuids
                            .iter()
                            .map(|u| u.parse())
                            .collect::<Result<Vec<Uuid>, _>>()?;
                        Ok(Service {
                            url: s.url,
                            name: s.name,
                            uuids,
                        })
                    })
                    .collect::<Result<Vec<_>, BluetoothError>>()?;
                Ok(Device {
                    address: d.address.parse()?,
                    name: d.name,
                    discoverable: d.discoverable,
                    reachable: d.reachable,
                    services,
                })
            })
            .collect::<Result<Vec<_>, BluetoothError>>()?;

        info!("Simulated radio ready with {} devices", devices.len());
        Ok(Self {
            inquiry_starts: scenario.inquiry_starts,
            inquiry_status: scenario.inquiry_status,
            devices: Arc::new(devices),
            event_delay,
            inquiry_cancelled: Arc::new(AtomicBool::new(false)),
            cancelled_searches: Arc::new(Mutex::new(HashSet::new())),
            next_transaction: AtomicU32::new(1),
        })
    }
}

fn spawn(name: &str, work: impl FnOnce() + Send + 'static) -> Result<(), BluetoothError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(work)
        .map(|_| ())
        .map_err(|e| BluetoothError::StackUnavailable(e.to_string()))
}

impl DiscoveryAgent for SimulatedRadio {
    fn start_inquiry(&self, access: AccessCode, sink: EventSink) -> Result<bool, BluetoothError> {
        if !self.inquiry_starts {
            return Ok(false);
        }
        debug!("Simulated inquiry with LAP {:#08X}", access.lap());
        self.inquiry_cancelled.store(false, Ordering::SeqCst);

        let devices = Arc::clone(&self.devices);
        let cancelled = Arc::clone(&self.inquiry_cancelled);
        let delay = self.event_delay;
        let status = self.inquiry_status;
        spawn("simulated-inquiry", move || {
            for device in devices.iter().filter(|d| d.discoverable) {
                thread::sleep(delay);
                if cancelled.load(Ordering::SeqCst) {
                    sink.inquiry_completed(InquiryStatus::Terminated);
                    return;
                }
                sink.device_discovered(DeviceIdentity::new(device.address));
            }
            thread::sleep(delay);
            if cancelled.load(Ordering::SeqCst) {
                sink.inquiry_completed(InquiryStatus::Terminated);
            } else {
                sink.inquiry_completed(status);
            }
        })?;
        Ok(true)
    }

    fn search_services(
        &self,
        _attribute_ids: &[u16],
        uuids: &[Uuid],
        device: &DeviceIdentity,
        sink: EventSink,
    ) -> Result<TransactionId, BluetoothError> {
        let transaction = self.next_transaction.fetch_add(1, Ordering::Relaxed);
        let target = self
            .devices
            .iter()
            .find(|d| d.address == device.address())
            .cloned();
        let wanted = uuids.to_vec();
        let cancelled = Arc::clone(&self.cancelled_searches);
        let delay = self.event_delay;

        spawn("simulated-search", move || {
            thread::sleep(delay);
            let Some(target) = target.filter(|d| d.reachable) else {
                sink.service_search_completed(transaction, SearchStatus::DeviceNotReachable);
                return;
            };

            let host = match &target.name {
                Some(name) => DeviceIdentity::with_name(target.address, name.clone()),
                None => DeviceIdentity::new(target.address),
            };
            let records: Vec<ServiceRecord> = target
                .services
                .iter()
                .filter(|s| wanted.iter().all(|u| s.uuids.contains(u)))
                .map(|s| ServiceRecord {
                    host: host.clone(),
                    connection_url: s.url.clone(),
                    service_name: s.name.clone(),
                })
                .collect();

            if records.is_empty() {
                sink.service_search_completed(transaction, SearchStatus::NoRecords);
                return;
            }
            sink.services_discovered(transaction, &records);
            thread::sleep(delay);

            let was_cancelled = cancelled
                .lock()
                .map(|mut set| set.remove(&transaction))
                .unwrap_or(false);
            let status = if was_cancelled {
                SearchStatus::Terminated
            } else {
                SearchStatus::Completed
            };
            sink.service_search_completed(transaction, status);
        })?;
        Ok(transaction)
    }

    fn cancel_inquiry(&self) -> bool {
        !self.inquiry_cancelled.swap(true, Ordering::SeqCst)
    }

    fn cancel_service_search(&self, transaction: TransactionId) -> bool {
        match self.cancelled_searches.lock() {
            Ok(mut set) => set.insert(transaction),
            Err(_) => {
                warn!("Cancelled search set is poisoned");
                false
            }
        }
    }

    fn friendly_name(&self, address: &BluetoothAddress) -> Result<String, BluetoothError> {
        self.devices
            .iter()
            .find(|d| d.address == *address)
            .and_then(|d| d.name.clone())
            .ok_or_else(|| BluetoothError::NameResolution(format!("{} did not answer", address)))
    }
}
