//! Contract with the local radio stack.

use crate::domain::models::{BluetoothAddress, DeviceIdentity, Uuid};
use crate::error::BluetoothError;
use crate::infrastructure::bluetooth::discovery::EventSink;

/// Stack-assigned identifier of a running endpoint search.
pub type TransactionId = u32;

/// Inquiry access codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCode {
    /// General inquiry: every discoverable device answers.
    General,
    /// Limited inquiry: only devices in limited discoverable mode answer.
    Limited,
}

impl AccessCode {
    pub fn lap(&self) -> u32 {
        match self {
            Self::General => 0x9E8B33,
            Self::Limited => 0x9E8B00,
        }
    }
}

/// Discovery half of a Bluetooth stack.
///
/// Both `start_*` calls return as soon as the stack has accepted the
/// request; results arrive later on the supplied [`EventSink`], from
/// whatever thread the stack delivers events on. The sink must receive
/// exactly one terminal event per accepted request. Dropping every clone
/// of the sink without one is read as an interrupted wait.
pub trait DiscoveryAgent: Send + Sync {
    /// Start an inquiry. `Ok(false)` means the stack declined to start it,
    /// in which case no events will follow.
    fn start_inquiry(&self, access: AccessCode, sink: EventSink) -> Result<bool, BluetoothError>;

    /// Start a service search on `device` for records matching every UUID
    /// in `uuids`, fetching `attribute_ids` for each match.
    fn search_services(
        &self,
        attribute_ids: &[u16],
        uuids: &[Uuid],
        device: &DeviceIdentity,
        sink: EventSink,
    ) -> Result<TransactionId, BluetoothError>;

    /// Ask the stack to stop the running inquiry. The stack then reports a
    /// terminated inquiry. Returns `false` if nothing was running.
    fn cancel_inquiry(&self) -> bool;

    fn cancel_service_search(&self, transaction: TransactionId) -> bool;

    /// Query the remote device for its user-friendly name.
    fn friendly_name(&self, address: &BluetoothAddress) -> Result<String, BluetoothError> {
        Err(BluetoothError::NameResolution(format!(
            "no name lookup available for {}",
            address
        )))
    }
}
