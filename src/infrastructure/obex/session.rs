//! Exchange sessions over a byte stream.
//!
//! [`ClientSession`] and [`PutOperation`] are the contract the push client
//! drives. [`StreamSession`] implements it on top of any [`ObexStream`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, PushError};
use crate::infrastructure::obex::protocol::{
    opcode, read_response, ConnectParams, Header, HeaderSet, Packet, ResponseCode,
    DEFAULT_MAX_PACKET, HEADER_OVERHEAD, MIN_PACKET_SIZE, PACKET_HEADER_LEN,
};

/// Opens sessions to endpoint URLs.
pub trait ObexTransport {
    type Session: ClientSession;

    fn open(&self, url: &str) -> Result<Self::Session, PushError>;
}

/// One open transport connection.
pub trait ClientSession {
    /// Run the connect handshake and return the peer's response code.
    fn connect(&mut self, headers: HeaderSet) -> Result<ResponseCode, PushError>;

    /// Begin a put transaction described by `headers`.
    fn put(&mut self, headers: HeaderSet) -> Result<Box<dyn PutOperation + '_>, PushError>;

    fn disconnect(&mut self) -> Result<ResponseCode, PushError>;

    /// Release the transport. Safe to call more than once.
    fn close(&mut self) -> Result<(), PushError>;
}

/// A put transaction in progress.
///
/// Callers open the output, write, close the output, then close the
/// operation to obtain the final response code.
pub trait PutOperation {
    fn open_output(&mut self) -> Result<(), PushError>;
    fn write(&mut self, data: &[u8]) -> Result<(), PushError>;
    fn close_output(&mut self) -> Result<(), PushError>;
    fn close(&mut self) -> Result<ResponseCode, PushError>;
}

/// Bidirectional byte stream carrying OBEX packets.
pub trait ObexStream: Read + Write {
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObexStream for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Connected,
    Disconnected,
    Closed,
}

/// OBEX client session over a stream.
pub struct StreamSession<S: ObexStream> {
    stream: S,
    local_max_packet: u16,
    max_packet: u16,
    connection_id: Option<u32>,
    state: SessionState,
}

impl<S: ObexStream> StreamSession<S> {
    pub fn new(stream: S) -> Self {
        Self::with_max_packet(stream, DEFAULT_MAX_PACKET)
    }

    pub fn with_max_packet(stream: S, max_packet: u16) -> Self {
        let max_packet = max_packet.max(MIN_PACKET_SIZE);
        Self {
            stream,
            local_max_packet: max_packet,
            max_packet: MIN_PACKET_SIZE,
            connection_id: None,
            state: SessionState::Open,
        }
    }

    /// Packet size agreed with the peer; the protocol minimum until connected.
    pub fn max_packet(&self) -> u16 {
        self.max_packet
    }

    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    fn exchange(&mut self, packet: &Packet, connect: bool) -> Result<Packet, PushError> {
        if self.state == SessionState::Closed {
            return Err(ProtocolError::InvalidState("use a closed session").into());
        }
        let limit = if connect {
            self.local_max_packet
        } else {
            self.max_packet
        };
        let bytes = packet.encode(limit)?;
        trace!("Sending packet 0x{:02X} ({} bytes)", packet.code, bytes.len());
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        read_response(&mut self.stream, connect)
    }

    /// Headers that lead every request once a connection ID is known.
    fn session_headers(&self) -> HeaderSet {
        let mut headers = HeaderSet::new();
        if let Some(id) = self.connection_id {
            headers.push(Header::ConnectionId(id));
        }
        headers
    }
}

impl<S: ObexStream> ClientSession for StreamSession<S> {
    fn connect(&mut self, headers: HeaderSet) -> Result<ResponseCode, PushError> {
        if self.state != SessionState::Open {
            return Err(ProtocolError::InvalidState("connect twice").into());
        }
        let request = Packet::new(opcode::CONNECT, headers)
            .with_prefix(&ConnectParams::new(self.local_max_packet).encode());
        let response = self.exchange(&request, true)?;
        let code = response.response_code();

        if code.is_success() {
            let params = ConnectParams::decode(&response.prefix)?;
            self.max_packet = params
                .max_packet
                .clamp(MIN_PACKET_SIZE, self.local_max_packet);
            self.connection_id = response.headers.connection_id();
            self.state = SessionState::Connected;
            debug!(
                "OBEX connected (version 0x{:02X}, max packet {}, connection id {:?})",
                params.version, self.max_packet, self.connection_id
            );
        }
        Ok(code)
    }

    fn put(&mut self, headers: HeaderSet) -> Result<Box<dyn PutOperation + '_>, PushError> {
        if self.state != SessionState::Connected {
            return Err(ProtocolError::InvalidState("put without a connection").into());
        }
        let mut pending = self.session_headers();
        for header in headers {
            pending.push(header);
        }
        Ok(Box::new(StreamPut {
            session: self,
            pending: Some(pending),
            buffer: Vec::new(),
            output: OutputState::NotOpened,
            started: false,
            failed: false,
            abandoned: false,
            finished: None,
        }))
    }

    fn disconnect(&mut self) -> Result<ResponseCode, PushError> {
        if self.state != SessionState::Connected {
            return Err(ProtocolError::InvalidState("disconnect without a connection").into());
        }
        let request = Packet::new(opcode::DISCONNECT, self.session_headers());
        self.state = SessionState::Disconnected;
        let response = self.exchange(&request, false)?;
        Ok(response.response_code())
    }

    fn close(&mut self) -> Result<(), PushError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.stream.shutdown()?;
        Ok(())
    }
}

impl<S: ObexStream> Drop for StreamSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Error closing OBEX transport: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputState {
    NotOpened,
    Open,
    Closed,
}

/// PUT transaction split into packets no larger than the negotiated size.
struct StreamPut<'a, S: ObexStream> {
    session: &'a mut StreamSession<S>,
    /// Headers not yet sent; they ride along with the first packet.
    pending: Option<HeaderSet>,
    buffer: Vec<u8>,
    output: OutputState,
    started: bool,
    /// A packet went unanswered or drew an unexpected reply; no more body
    /// may be sent.
    failed: bool,
    /// ABORT was sent, or the transaction was given up before it started.
    abandoned: bool,
    finished: Option<ResponseCode>,
}

impl<S: ObexStream> StreamPut<'_, S> {
    /// Body bytes that fit next to `headers` in one packet.
    fn room(&self, headers: &HeaderSet) -> usize {
        (self.session.max_packet as usize)
            .saturating_sub(PACKET_HEADER_LEN + headers.encoded_len() + HEADER_OVERHEAD)
    }

    fn send(&mut self, code: u8, headers: HeaderSet) -> Result<ResponseCode, PushError> {
        self.started = true;
        let response = self.session.exchange(&Packet::new(code, headers), false)?;
        Ok(response.response_code())
    }

    /// Send every full packet the buffer holds, keeping the tail. Any error
    /// other than a peer rejection leaves the operation failed.
    fn flush_full(&mut self) -> Result<(), PushError> {
        let result = self.send_full_packets();
        if result.is_err() && self.finished.is_none() {
            self.failed = true;
        }
        result
    }

    fn send_full_packets(&mut self) -> Result<(), PushError> {
        loop {
            let headers = self.pending.clone().unwrap_or_default();
            let room = self.room(&headers);
            if room == 0 {
                return Err(ProtocolError::PacketTooLarge {
                    size: headers.encoded_len() + PACKET_HEADER_LEN + HEADER_OVERHEAD,
                    max: self.session.max_packet,
                }
                .into());
            }
            if self.buffer.len() <= room {
                return Ok(());
            }
            let chunk: Vec<u8> = self.buffer.drain(..room).collect();
            self.pending = None;
            let code = self.send(opcode::PUT, headers.with(Header::Body(chunk)))?;
            if code.is_success() {
                return Err(ProtocolError::UnexpectedResponse(code.raw()).into());
            }
            if code != ResponseCode::CONTINUE {
                self.finished = Some(code);
                return Err(PushError::OperationRejected(code));
            }
        }
    }

    fn abort(&mut self) -> Result<(), PushError> {
        self.abandoned = true;
        let headers = self.session.session_headers();
        let code = self.send(opcode::ABORT, headers)?;
        debug!("PUT aborted, peer answered {}", code);
        Ok(())
    }
}

impl<S: ObexStream> PutOperation for StreamPut<'_, S> {
    fn open_output(&mut self) -> Result<(), PushError> {
        if self.output != OutputState::NotOpened || self.finished.is_some() {
            return Err(ProtocolError::InvalidState("open the output twice").into());
        }
        self.output = OutputState::Open;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PushError> {
        if self.output != OutputState::Open || self.finished.is_some() {
            return Err(ProtocolError::InvalidState("write without an open output").into());
        }
        if self.failed || self.abandoned {
            return Err(ProtocolError::InvalidState("write after a failed packet").into());
        }
        self.buffer.extend_from_slice(data);
        self.flush_full()
    }

    fn close_output(&mut self) -> Result<(), PushError> {
        if self.output == OutputState::Open {
            self.output = OutputState::Closed;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<ResponseCode, PushError> {
        if let Some(code) = self.finished {
            return Ok(code);
        }
        if self.abandoned {
            return Err(PushError::Aborted);
        }
        if self.failed || self.output == OutputState::Open {
            if self.failed {
                warn!("PUT failed part way, aborting");
            } else {
                warn!("PUT closed with its output still open, aborting");
            }
            self.abandoned = true;
            if self.started {
                if let Err(e) = self.abort() {
                    debug!("Failed to abort PUT: {}", e);
                }
            }
            return Err(PushError::Aborted);
        }

        // Room for the EndOfBody header has to be left in the final packet.
        self.flush_full()?;
        let mut headers = self.pending.take().unwrap_or_default();
        if self.output == OutputState::Closed {
            headers.push(Header::EndOfBody(std::mem::take(&mut self.buffer)));
        }
        let code = self.send(opcode::PUT_FINAL, headers)?;
        self.finished = Some(code);
        Ok(code)
    }
}

impl<S: ObexStream> Drop for StreamPut<'_, S> {
    fn drop(&mut self) {
        if self.started && self.finished.is_none() && !self.abandoned {
            if let Err(e) = self.abort() {
                debug!("Failed to abort unfinished PUT: {}", e);
            }
        }
    }
}
