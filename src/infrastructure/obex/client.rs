//! Push Client
//!
//! Opens an exchange session to one endpoint URL, pushes a single object
//! and tears the session down. The session is closed on every exit path.

use tracing::{debug, error, info, warn};

use crate::error::PushError;
use crate::infrastructure::obex::protocol::{Header, HeaderSet, ResponseCode};
use crate::infrastructure::obex::session::{ClientSession, ObexTransport};

/// A named, typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushObject {
    pub name: String,
    pub media_type: String,
    pub payload: Vec<u8>,
}

impl PushObject {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            payload,
        }
    }

    /// Text object whose payload is `text` in ISO-8859-1.
    pub fn text(name: impl Into<String>, media_type: impl Into<String>, text: &str) -> Self {
        Self::new(name, media_type, encode_latin1(text))
    }

    pub fn greeting() -> Self {
        Self::text("Hello.txt", "text", "Hello!")
    }
}

/// ISO-8859-1 bytes for `text`; characters outside it become `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Client that opens sessions through `T`.
pub struct ObexClient<T: ObexTransport> {
    transport: T,
}

impl<T: ObexTransport> ObexClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open `url` and run the connect handshake.
    ///
    /// Only an OK response yields a session; any other code, or a transport
    /// failure, closes whatever was opened and returns the error.
    pub fn connect(&self, url: &str) -> Result<ExchangeSession<T::Session>, PushError> {
        info!("Connecting to {}", url);
        let mut session = self.transport.open(url)?;

        match session.connect(HeaderSet::new()) {
            Ok(code) if code == ResponseCode::OK => {
                info!("Session established with {}", url);
                Ok(ExchangeSession {
                    session,
                    closed: false,
                })
            }
            Ok(code) => {
                warn!("Connect to {} rejected with {}", url, code);
                release(&mut session);
                Err(PushError::HandshakeRejected(code))
            }
            Err(e) => {
                error!("Connect to {} failed: {}", url, e);
                release(&mut session);
                Err(e)
            }
        }
    }

    /// Connect, push `object`, then disconnect.
    pub fn send(&self, url: &str, object: &PushObject) -> Result<ResponseCode, PushError> {
        let mut session = self.connect(url)?;
        let code = session.push_object(object)?;
        if let Err(e) = session.disconnect() {
            warn!("Disconnect after a successful push failed: {}", e);
        }
        Ok(code)
    }
}

/// Name, Type and, when the size fits in 32 bits, Length.
fn push_headers(name: &str, media_type: &str, len: usize) -> HeaderSet {
    let mut headers = HeaderSet::new()
        .with(Header::Name(name.to_string()))
        .with(Header::Type(media_type.to_string()));
    match u32::try_from(len) {
        Ok(len) => headers.push(Header::Length(len)),
        Err(_) => debug!("Object of {} bytes is too large for a Length header", len),
    }
    headers
}

fn release<S: ClientSession>(session: &mut S) {
    if let Err(e) = session.close() {
        debug!("Error closing session: {}", e);
    }
}

/// A connected session, owned by whoever opened it.
///
/// Dropping it without calling [`ExchangeSession::disconnect`] still
/// releases the transport.
pub struct ExchangeSession<S: ClientSession> {
    session: S,
    closed: bool,
}

impl<S: ClientSession> ExchangeSession<S> {
    /// Push one object. The output and the operation are always closed,
    /// in that order, whether or not the write succeeds.
    pub fn push(
        &mut self,
        name: &str,
        media_type: &str,
        payload: &[u8],
    ) -> Result<ResponseCode, PushError> {
        let headers = push_headers(name, media_type, payload.len());

        debug!("Pushing {} ({}, {} bytes)", name, media_type, payload.len());
        let mut operation = self.session.put(headers)?;
        let written = operation
            .open_output()
            .and_then(|_| operation.write(payload));
        let output_closed = operation.close_output();
        let finished = operation.close();
        drop(operation);

        written?;
        output_closed?;
        let code = finished?;
        if !code.is_success() {
            warn!("Push of {} rejected with {}", name, code);
            return Err(PushError::OperationRejected(code));
        }
        info!("Pushed {} ({})", name, code);
        Ok(code)
    }

    pub fn push_object(&mut self, object: &PushObject) -> Result<ResponseCode, PushError> {
        self.push(&object.name, &object.media_type, &object.payload)
    }

    /// Run the disconnect handshake, then release the transport.
    /// Consumes the session, so it can only happen once.
    pub fn disconnect(mut self) -> Result<ResponseCode, PushError> {
        let result = self.session.disconnect();
        self.closed = true;
        let closed = self.session.close();
        let code = result?;
        closed?;
        debug!("Disconnected with {}", code);
        Ok(code)
    }
}

impl<S: ClientSession> Drop for ExchangeSession<S> {
    fn drop(&mut self) {
        if !self.closed {
            release(&mut self.session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::obex::session::PutOperation;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    /// Calls observed by the fake transport, in order.
    type Log = Rc<RefCell<Vec<String>>>;

    #[derive(Clone, Copy)]
    enum WriteBehavior {
        Accept,
        FailMidStream,
    }

    struct FakeTransport {
        log: Log,
        open_fails: bool,
        connect_code: ResponseCode,
        write: WriteBehavior,
        final_code: ResponseCode,
    }

    impl FakeTransport {
        fn new(connect_code: ResponseCode) -> Self {
            Self {
                log: Rc::new(RefCell::new(Vec::new())),
                open_fails: false,
                connect_code,
                write: WriteBehavior::Accept,
                final_code: ResponseCode::OK,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    struct FakeSession {
        log: Log,
        connect_code: ResponseCode,
        write: WriteBehavior,
        final_code: ResponseCode,
    }

    struct FakePut {
        log: Log,
        write: WriteBehavior,
        final_code: ResponseCode,
    }

    impl ObexTransport for FakeTransport {
        type Session = FakeSession;

        fn open(&self, url: &str) -> Result<FakeSession, PushError> {
            self.log.borrow_mut().push(format!("open {}", url));
            if self.open_fails {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
            }
            Ok(FakeSession {
                log: Rc::clone(&self.log),
                connect_code: self.connect_code,
                write: self.write,
                final_code: self.final_code,
            })
        }
    }

    impl ClientSession for FakeSession {
        fn connect(&mut self, _headers: HeaderSet) -> Result<ResponseCode, PushError> {
            self.log.borrow_mut().push("connect".into());
            Ok(self.connect_code)
        }

        fn put(&mut self, headers: HeaderSet) -> Result<Box<dyn PutOperation + '_>, PushError> {
            self.log.borrow_mut().push(format!(
                "put {} {}",
                headers.name().unwrap_or_default(),
                headers.media_type().unwrap_or_default()
            ));
            Ok(Box::new(FakePut {
                log: Rc::clone(&self.log),
                write: self.write,
                final_code: self.final_code,
            }))
        }

        fn disconnect(&mut self) -> Result<ResponseCode, PushError> {
            self.log.borrow_mut().push("disconnect".into());
            Ok(ResponseCode::OK)
        }

        fn close(&mut self) -> Result<(), PushError> {
            self.log.borrow_mut().push("close".into());
            Ok(())
        }
    }

    impl PutOperation for FakePut {
        fn open_output(&mut self) -> Result<(), PushError> {
            self.log.borrow_mut().push("open_output".into());
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), PushError> {
            match self.write {
                WriteBehavior::Accept => {
                    self.log
                        .borrow_mut()
                        .push(format!("write {}", String::from_utf8_lossy(data)));
                    Ok(())
                }
                WriteBehavior::FailMidStream => {
                    self.log.borrow_mut().push("write failed".into());
                    Err(io::Error::from(io::ErrorKind::BrokenPipe).into())
                }
            }
        }

        fn close_output(&mut self) -> Result<(), PushError> {
            self.log.borrow_mut().push("close_output".into());
            Ok(())
        }

        fn close(&mut self) -> Result<ResponseCode, PushError> {
            self.log.borrow_mut().push("close_operation".into());
            Ok(self.final_code)
        }
    }

    #[test]
    fn test_handshake_gate_accepts_only_ok() {
        for raw in 0u8..=0xFF {
            let code = ResponseCode::from_raw(raw);
            let client = ObexClient::new(FakeTransport::new(code));
            let result = client.connect("conn://X:5");
            if code == ResponseCode::OK {
                assert!(result.is_ok(), "{} should be accepted", code);
            } else {
                match result {
                    Err(PushError::HandshakeRejected(rejected)) => assert_eq!(rejected, code),
                    Err(other) => panic!("unexpected error for {}: {}", code, other),
                    Ok(_) => panic!("{} should be rejected", code),
                }
            }
        }
    }

    #[test]
    fn test_rejected_handshake_closes_and_never_pushes() {
        let client = ObexClient::new(FakeTransport::new(ResponseCode::FORBIDDEN));
        assert!(client.connect("conn://X:5").is_err());
        assert_eq!(
            client.transport().calls(),
            vec!["open conn://X:5", "connect", "close"]
        );
    }

    #[test]
    fn test_transport_failure_is_distinct_from_rejection() {
        let mut transport = FakeTransport::new(ResponseCode::OK);
        transport.open_fails = true;
        let client = ObexClient::new(transport);
        let err = client.connect("conn://X:5").err().unwrap();
        assert!(matches!(err, PushError::TransportFailure(_)));
        assert_eq!(client.transport().calls(), vec!["open conn://X:5"]);
    }

    #[test]
    fn test_greeting_push_then_single_disconnect() {
        let client = ObexClient::new(FakeTransport::new(ResponseCode::OK));
        let mut session = client.connect("conn://X:5").unwrap();
        let object = PushObject::greeting();
        let code = session
            .push(&object.name, &object.media_type, &object.payload)
            .unwrap();
        assert_eq!(code, ResponseCode::OK);
        assert_eq!(session.disconnect().unwrap(), ResponseCode::OK);

        assert_eq!(
            client.transport().calls(),
            vec![
                "open conn://X:5",
                "connect",
                "put Hello.txt text",
                "open_output",
                "write Hello!",
                "close_output",
                "close_operation",
                "disconnect",
                "close",
            ]
        );
    }

    #[test]
    fn test_failed_write_still_closes_output_and_operation() {
        let mut transport = FakeTransport::new(ResponseCode::OK);
        transport.write = WriteBehavior::FailMidStream;
        let client = ObexClient::new(transport);
        {
            let mut session = client.connect("conn://X:5").unwrap();
            let err = session.push_object(&PushObject::greeting()).unwrap_err();
            assert!(matches!(err, PushError::TransportFailure(_)));
        }
        assert_eq!(
            client.transport().calls(),
            vec![
                "open conn://X:5",
                "connect",
                "put Hello.txt text",
                "open_output",
                "write failed",
                "close_output",
                "close_operation",
                "close",
            ]
        );
    }

    #[test]
    fn test_refused_put_is_reported() {
        let mut transport = FakeTransport::new(ResponseCode::OK);
        transport.final_code = ResponseCode::NOT_ACCEPTABLE;
        let client = ObexClient::new(transport);
        let err = client
            .send("conn://X:5", &PushObject::greeting())
            .unwrap_err();
        assert!(matches!(
            err,
            PushError::OperationRejected(ResponseCode::NOT_ACCEPTABLE)
        ));
        assert_eq!(client.transport().calls().last().unwrap(), "close");
    }

    #[test]
    fn test_send_runs_full_exchange() {
        let client = ObexClient::new(FakeTransport::new(ResponseCode::OK));
        let code = client.send("conn://X:5", &PushObject::greeting()).unwrap();
        assert_eq!(code, ResponseCode::OK);
        let calls = client.transport().calls();
        assert_eq!(&calls[calls.len() - 2..], ["disconnect", "close"]);
    }

    #[test]
    fn test_dropped_session_is_closed() {
        let client = ObexClient::new(FakeTransport::new(ResponseCode::OK));
        drop(client.connect("conn://X:5").unwrap());
        assert_eq!(client.transport().calls().last().unwrap(), "close");
    }

    #[test]
    fn test_length_header_only_when_size_fits() {
        let headers = push_headers("a.bin", "bin", 600);
        assert!(headers.iter().any(|h| *h == Header::Length(600)));

        if let Ok(len) = usize::try_from(u64::from(u32::MAX) + 1) {
            let headers = push_headers("a.bin", "bin", len);
            assert_eq!(headers.name(), Some("a.bin"));
            assert!(!headers.iter().any(|h| matches!(h, Header::Length(_))));
        }
    }

    #[test]
    fn test_latin1_encoding() {
        assert_eq!(PushObject::greeting().payload, b"Hello!");
        assert_eq!(encode_latin1("café"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(encode_latin1("€"), vec![b'?']);
    }
}
