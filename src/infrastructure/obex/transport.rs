//! Connection URLs and the TCP transport.

use std::fmt;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::PushError;
use crate::infrastructure::obex::session::{ObexTransport, StreamSession};

/// URL scheme for OBEX over RFCOMM.
pub const SCHEME_RFCOMM: &str = "btgoep";

/// URL scheme for OBEX over TCP.
pub const SCHEME_TCP: &str = "tcpobex";

/// IANA port assigned to OBEX over TCP.
pub const DEFAULT_TCP_PORT: u16 = 650;

/// Parsed endpoint URL: `scheme://target[:channel][;key=value...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    pub scheme: String,
    pub target: String,
    pub channel: Option<u16>,
    pub params: Vec<(String, String)>,
}

impl ConnectionUrl {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl FromStr for ConnectionUrl {
    type Err = PushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PushError::InvalidUrl(s.to_string());

        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        let mut parts = rest.split(';');
        let authority = parts.next().unwrap_or_default();
        let (target, channel) = match authority.rsplit_once(':') {
            Some((target, channel)) => {
                let channel = channel.parse::<u16>().map_err(|_| invalid())?;
                (target, Some(channel))
            }
            None => (authority, None),
        };
        if target.is_empty() {
            return Err(invalid());
        }

        let params = parts
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(invalid)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            target: target.to_string(),
            channel,
            params,
        })
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.target)?;
        if let Some(channel) = self.channel {
            write!(f, ":{}", channel)?;
        }
        for (key, value) in &self.params {
            write!(f, ";{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Opens `tcpobex://` endpoints.
#[derive(Debug, Clone)]
pub struct TcpObexTransport {
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
}

impl Default for TcpObexTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TcpObexTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    fn connect_stream(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            debug!("Trying {}", addr);
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", host),
            )
        }))
    }
}

impl ObexTransport for TcpObexTransport {
    type Session = StreamSession<TcpStream>;

    fn open(&self, url: &str) -> Result<Self::Session, PushError> {
        let url: ConnectionUrl = url.parse()?;
        if url.scheme != SCHEME_TCP {
            return Err(PushError::TransportFailure(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported scheme {}", url.scheme),
            )));
        }

        let port = url.channel.unwrap_or(DEFAULT_TCP_PORT);
        let stream = self.connect_stream(&url.target, port)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        info!("Transport open to {}:{}", url.target, port);
        Ok(StreamSession::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_parse_rfcomm_url() {
        let url: ConnectionUrl = "btgoep://B8F9348D57DF:12;authenticate=false;encrypt=false"
            .parse()
            .unwrap();
        assert_eq!(url.scheme, SCHEME_RFCOMM);
        assert_eq!(url.target, "B8F9348D57DF");
        assert_eq!(url.channel, Some(12));
        assert_eq!(url.param("encrypt"), Some("false"));
        assert_eq!(
            url.to_string(),
            "btgoep://B8F9348D57DF:12;authenticate=false;encrypt=false"
        );
    }

    #[test]
    fn test_parse_url_without_channel() {
        let url: ConnectionUrl = "tcpobex://localhost".parse().unwrap();
        assert_eq!(url.target, "localhost");
        assert_eq!(url.channel, None);
        assert!(url.params.is_empty());
    }

    #[test]
    fn test_reject_malformed_urls() {
        for bad in [
            "B8F9348D57DF:12",
            "://host:1",
            "btgoep://:12",
            "btgoep://host:notaport",
            "btgoep://host:1;novalue",
        ] {
            assert!(
                matches!(bad.parse::<ConnectionUrl>(), Err(PushError::InvalidUrl(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_rfcomm_is_unsupported_over_tcp_transport() {
        let err = TcpObexTransport::default()
            .open("btgoep://B8F9348D57DF:12")
            .err()
            .unwrap();
        match err {
            PushError::TransportFailure(e) => assert_eq!(e.kind(), io::ErrorKind::Unsupported),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_refused_connection_is_transport_failure() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = TcpObexTransport::new(Duration::from_secs(2))
            .open(&format!("tcpobex://127.0.0.1:{}", port))
            .err()
            .unwrap();
        assert!(matches!(err, PushError::TransportFailure(_)));
    }

    #[test]
    fn test_open_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let session = TcpObexTransport::default()
            .open(&format!("tcpobex://127.0.0.1:{}", port))
            .unwrap();
        assert!(listener.accept().is_ok());
        assert_eq!(session.connection_id(), None);
    }
}
