use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BluetoothError;

/// 48-bit Bluetooth Classic device address.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, PartialOrd, Ord)]
pub struct BluetoothAddress([u8; 6]);

impl BluetoothAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<u64> for BluetoothAddress {
    fn from(addr: u64) -> Self {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&addr.to_be_bytes()[2..]);
        Self(bytes)
    }
}

impl From<BluetoothAddress> for u64 {
    fn from(addr: BluetoothAddress) -> Self {
        let mut bytes = [0u8; 8];
        bytes[2..].copy_from_slice(&addr.0);
        u64::from_be_bytes(bytes)
    }
}

/// Printed the way stacks report addresses: twelve upper-case hex digits,
/// no separators.
impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Accepts `B8F9348D57DF` as well as `B8:F9:34:8D:57:DF` or dash-separated.
impl FromStr for BluetoothAddress {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if digits.len() != 12 {
            return Err(BluetoothError::InvalidAddress(s.to_string()));
        }
        let value = u64::from_str_radix(&digits, 16)
            .map_err(|_| BluetoothError::InvalidAddress(s.to_string()))?;
        Ok(Self::from(value))
    }
}

/// A discovered remote device.
///
/// Identity is the address alone: two values with the same address compare
/// equal regardless of whether the name was resolved.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    address: BluetoothAddress,
    name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(address: BluetoothAddress) -> Self {
        Self {
            address,
            name: None,
        }
    }

    pub fn with_name(address: BluetoothAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
        }
    }

    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// Name reported by the stack at discovery time, if it had one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name if known, otherwise the address.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.address.to_string(),
        }
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.address, name),
            None => write!(f, "{}", self.address),
        }
    }
}

/// One connectable endpoint found on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub url: String,
    pub device: BluetoothAddress,
}

impl EndpointDescriptor {
    pub fn new(url: impl Into<String>, device: BluetoothAddress) -> Self {
        Self {
            url: url.into(),
            device,
        }
    }
}

/// Service record as delivered by an endpoint search.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub host: DeviceIdentity,
    /// Connection URL resolved by the stack with no authentication, no
    /// encryption and no master role. `None` when the record describes
    /// nothing connectable.
    pub connection_url: Option<String>,
    pub service_name: Option<String>,
}

impl ServiceRecord {
    pub fn new(host: DeviceIdentity, connection_url: Option<String>) -> Self {
        Self {
            host,
            connection_url,
            service_name: None,
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        self.connection_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// 128-bit service class UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid(u128);

impl Uuid {
    /// Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`.
    const BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

    /// Expand a 16- or 32-bit assigned number onto the base UUID.
    pub fn from_short(short: u32) -> Self {
        Self(Self::BASE | ((short as u128) << 96))
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// Assigned number when this UUID sits on the base UUID.
    pub fn short(&self) -> Option<u32> {
        let mask = (u32::MAX as u128) << 96;
        if self.0 & !mask == Self::BASE {
            Some((self.0 >> 96) as u32)
        } else {
            None
        }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Accepts a short assigned number (`"0003"`, `"0x1105"`) or a full
/// dash-separated UUID.
impl FromStr for Uuid {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BluetoothError::InvalidUuid(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if trimmed.len() <= 8 {
            let short = u32::from_str_radix(trimmed, 16).map_err(|_| invalid())?;
            return Ok(Self::from_short(short));
        }

        let hex = trimmed.replace('-', "");
        if hex.len() != 32 {
            return Err(invalid());
        }
        u128::from_str_radix(&hex, 16)
            .map(Self)
            .map_err(|_| invalid())
    }
}

/// Terminal code of a device inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InquiryStatus {
    Completed,
    Terminated,
    Error,
    Unknown(i32),
}

impl InquiryStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0x00 => Self::Completed,
            0x05 => Self::Terminated,
            0x07 => Self::Error,
            other => Self::Unknown(other),
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for InquiryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "device search is complete"),
            Self::Terminated => write!(f, "device search was interrupted"),
            Self::Error => write!(f, "an error occurred during device search"),
            Self::Unknown(code) => write!(f, "unknown inquiry code {}", code),
        }
    }
}

/// Terminal code of an endpoint search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Completed,
    Terminated,
    Error,
    NoRecords,
    DeviceNotReachable,
    Unknown(i32),
}

impl SearchStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0x01 => Self::Completed,
            0x02 => Self::Terminated,
            0x03 => Self::Error,
            0x04 => Self::NoRecords,
            0x06 => Self::DeviceNotReachable,
            other => Self::Unknown(other),
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "service search is complete"),
            Self::Terminated => write!(f, "service search was interrupted"),
            Self::Error => write!(f, "an error occurred while searching for services"),
            Self::NoRecords => write!(f, "no records were found during the service search"),
            Self::DeviceNotReachable => write!(f, "the device is not reachable"),
            Self::Unknown(code) => write!(f, "unknown service search code {}", code),
        }
    }
}

/// Progress notifications forwarded to the driver while searches run.
#[derive(Debug, Clone)]
pub enum AppEvent {
    DeviceFound(DeviceIdentity),
    InquiryFinished(InquiryStatus),
    EndpointFound(EndpointDescriptor),
    SearchFinished {
        device: BluetoothAddress,
        status: SearchStatus,
    },
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
