//! Library error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::infrastructure::obex::protocol::ResponseCode;

/// Errors raised by device inquiry and endpoint search.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum BluetoothError {
    /// The local radio stack could not be reached, e.g. no adapter present
    /// or the stack refused the request outright.
    #[error("bluetooth stack unavailable: {0}")]
    StackUnavailable(String),
    /// The stack declined to start an inquiry. Only surfaced in strict mode;
    /// otherwise a declined inquiry reads as zero devices.
    #[error("inquiry could not be started")]
    InquiryFailedToStart,
    /// A search ended with a terminal code other than normal completion.
    /// Only surfaced in strict mode.
    #[error("search terminated abnormally: {0}")]
    SearchTerminatedAbnormally(String),
    /// The blocking wait ended before the terminal event arrived, e.g. the
    /// stack released the event sink without reporting completion.
    #[error("wait for discovery completion was interrupted")]
    InterruptedWait,
    /// No terminal event arrived within the configured timeout.
    #[error("discovery timed out after {0:?}")]
    DiscoveryTimedOut(Duration),
    /// Friendly-name lookup failed; callers fall back to the address.
    #[error("name resolution failed: {0}")]
    NameResolution(String),
    #[error("invalid bluetooth address: {0}")]
    InvalidAddress(String),
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

/// Malformed or oversized OBEX packets.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packet truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("invalid packet length field: {0}")]
    InvalidLength(u16),
    #[error("header 0x{0:02X} has an invalid length")]
    InvalidHeaderLength(u8),
    #[error("header 0x{0:02X} carries malformed text")]
    InvalidText(u8),
    #[error("packet of {size} bytes exceeds negotiated maximum of {max}")]
    PacketTooLarge { size: usize, max: u16 },
    #[error("unexpected response 0x{0:02X} to a non-final packet")]
    UnexpectedResponse(u8),
    #[error("operation is not in a state to {0}")]
    InvalidState(&'static str),
}

/// Errors raised by the exchange session client.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PushError {
    /// The remote endpoint answered the connect handshake with a code other
    /// than OK.
    #[error("connect handshake rejected with {0}")]
    HandshakeRejected(ResponseCode),
    /// I/O failure while opening, using, or closing the transport.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The remote endpoint refused a put transaction.
    #[error("operation rejected with {0}")]
    OperationRejected(ResponseCode),
    /// The put transaction was abandoned before its final packet.
    #[error("operation aborted before completion")]
    Aborted,
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
}
