//! Byte transport shared by the relay client, the reference server and the
//! intake listener: a TCP socket that may be upgraded in place to TLS.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use native_tls::{HandshakeError, TlsAcceptor, TlsConnector, TlsStream};

#[derive(Debug)]
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
    Invalid,
}

impl Transport {
    pub(crate) fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub(crate) fn tcp(&self) -> Option<&TcpStream> {
        match self {
            Self::Plain(stream) => Some(stream),
            Self::Tls(stream) => Some(stream.get_ref()),
            Self::Invalid => None,
        }
    }

    pub(crate) fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        if let Some(stream) = self.tcp() {
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        }
        Ok(())
    }

    /// Client side TLS handshake over the current plain socket. An already
    /// encrypted transport is left untouched.
    pub(crate) fn connect_tls(
        &mut self,
        connector: &TlsConnector,
        domain: &str,
    ) -> Result<(), native_tls::Error> {
        let plain = match std::mem::replace(self, Self::Invalid) {
            Self::Plain(stream) => stream,
            other => {
                *self = other;
                return Ok(());
            }
        };
        *self = Self::Tls(complete_handshake(connector.connect(domain, plain))?);
        Ok(())
    }

    /// Server side TLS handshake. On failure the original socket is kept so
    /// the caller can carry on in plain text.
    pub(crate) fn accept_tls(&mut self, acceptor: &TlsAcceptor) -> io::Result<bool> {
        let plain = match std::mem::replace(self, Self::Invalid) {
            Self::Plain(stream) => stream,
            other => {
                *self = other;
                return Ok(false);
            }
        };
        let fallback = plain.try_clone()?;
        match complete_handshake(acceptor.accept(plain)) {
            Ok(tls) => {
                *self = Self::Tls(tls);
                Ok(true)
            }
            Err(_) => {
                *self = Self::Plain(fallback);
                Ok(false)
            }
        }
    }

    pub(crate) fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown(Shutdown::Both),
            Self::Tls(stream) => {
                // close_notify is best effort, the socket still goes away
                let _ = stream.shutdown();
                stream.get_ref().shutdown(Shutdown::Both)
            }
            Self::Invalid => Ok(()),
        }
    }
}

fn invalid_state() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "invalid stream state")
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
            Self::Invalid => Err(invalid_state()),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
            Self::Invalid => Err(invalid_state()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
            Self::Invalid => Err(invalid_state()),
        }
    }
}

fn complete_handshake(
    mut result: Result<TlsStream<TcpStream>, HandshakeError<TcpStream>>,
) -> Result<TlsStream<TcpStream>, native_tls::Error> {
    loop {
        match result {
            Ok(tls) => return Ok(tls),
            Err(HandshakeError::Failure(err)) => return Err(err),
            Err(HandshakeError::WouldBlock(mid)) => result = mid.handshake(),
        }
    }
}
