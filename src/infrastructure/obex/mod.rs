//! OBEX Module
//!
//! Object push over a connection-oriented exchange session.
//!
//! ## Modules
//!
//! - [`protocol`] - Packet and header framing
//! - [`session`] - Session contract and the stream-backed implementation
//! - [`transport`] - Connection URLs and the TCP transport
//! - [`client`] - Connect / push / disconnect client

pub mod client;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{ExchangeSession, ObexClient, PushObject};
pub use protocol::{Header, HeaderSet, ResponseCode};
pub use session::{ClientSession, ObexStream, ObexTransport, PutOperation, StreamSession};
pub use transport::{ConnectionUrl, TcpObexTransport};
