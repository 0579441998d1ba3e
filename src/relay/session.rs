use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use native_tls::TlsConnector;
use tracing::debug;

use crate::auth::{Authenticator, ServerInfo};
use crate::transport::Transport;

use super::error::SmtpError;
use super::options::RelayOptions;
use super::types::SmtpReply;

/// Longest reply line accepted from the upstream server.
const MAX_REPLY_LINE: usize = 4096;

#[derive(Debug)]
pub(crate) struct SmtpStream {
    transport: Transport,
    buffer: Vec<u8>,
}

impl SmtpStream {
    pub(crate) fn connect(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self, SmtpError> {
        let connect_err = |source| SmtpError::Connect {
            host: format!("{host}:{port}"),
            source,
        };
        let addrs = (host, port).to_socket_addrs().map_err(connect_err)?;
        let mut last_err = None;
        for addr in addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    let transport = Transport::Plain(stream);
                    transport.set_timeouts(timeout)?;
                    return Ok(Self {
                        transport,
                        buffer: Vec::new(),
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(connect_err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no socket address available",
            )
        })))
    }

    pub(crate) fn upgrade_tls(
        &mut self,
        domain: &str,
        connector: &TlsConnector,
    ) -> Result<(), SmtpError> {
        // anything buffered before the handshake belongs to the plain session
        self.buffer.clear();
        self.transport
            .connect_tls(connector, domain)
            .map_err(|source| SmtpError::Tls { source })
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    pub(crate) fn send_command(&mut self, command: &str) -> Result<(), SmtpError> {
        let mut data = command.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.write_all(&data)
    }

    pub(crate) fn write_all(&mut self, data: &[u8]) -> Result<(), SmtpError> {
        self.transport.write_all(data)?;
        self.transport.flush()?;
        Ok(())
    }

    pub(crate) fn read_reply(&mut self) -> Result<SmtpReply, SmtpError> {
        let mut lines = Vec::new();
        let mut code: Option<u16> = None;
        loop {
            let line = self.read_line()?;
            if line.len() < 3 {
                return Err(SmtpError::Protocol(format!("invalid reply: {line}")));
            }
            let parsed_code = line
                .get(..3)
                .and_then(|digits| digits.parse::<u16>().ok())
                .ok_or_else(|| SmtpError::Protocol(format!("invalid code in line: {line}")))?;
            if let Some(existing) = code {
                if existing != parsed_code {
                    return Err(SmtpError::Protocol(format!(
                        "inconsistent reply codes: {existing} vs {parsed_code}"
                    )));
                }
            } else {
                code = Some(parsed_code);
            }
            let is_last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());
            if is_last {
                break;
            }
        }
        Ok(SmtpReply {
            code: code.unwrap_or(0),
            lines,
        })
    }

    fn read_line(&mut self) -> Result<String, SmtpError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let mut line = self.buffer.drain(..=pos).collect::<Vec<_>>();
                if line.ends_with(b"\r\n") {
                    line.truncate(line.len() - 2);
                } else {
                    line.truncate(line.len() - 1);
                }
                return String::from_utf8(line)
                    .map_err(|err| SmtpError::Protocol(format!("utf8 error: {err}")));
            }

            if self.buffer.len() > MAX_REPLY_LINE {
                return Err(SmtpError::Protocol(format!(
                    "reply line exceeds {MAX_REPLY_LINE} bytes"
                )));
            }

            let mut buf = [0u8; 512];
            let read = self.transport.read(&mut buf)?;
            if read == 0 {
                return Err(SmtpError::Io {
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
                });
            }
            self.buffer.extend_from_slice(&buf[..read]);
        }
    }
}

/// `expect` follows the textproto convention: a one or two digit value
/// matches every code with that prefix (`25` accepts 250 and 251).
fn code_matches(code: u16, expect: u16) -> bool {
    match expect {
        0 => true,
        1..=9 => code / 100 == expect,
        10..=99 => code / 10 == expect,
        _ => code == expect,
    }
}

/// Client side of one outbound SMTP session.
///
/// The socket is released exactly once: by [`SmtpSession::quit`] when the
/// termination exchange completes, otherwise when the session is dropped.
pub(crate) struct SmtpSession {
    host: String,
    stream: SmtpStream,
    extensions: HashMap<String, String>,
    closed: bool,
}

impl SmtpSession {
    /// Dial the upstream. With `starttls` off the TLS handshake happens right
    /// away (implicit TLS).
    pub(crate) fn connect(
        options: &RelayOptions,
        connector: &TlsConnector,
    ) -> Result<Self, SmtpError> {
        let mut session = Self::connect_plain(&options.host, options.port, options.timeout)?;
        if !options.starttls {
            session.stream.upgrade_tls(&options.host, connector)?;
        }
        Ok(session)
    }

    /// Dial without any TLS, for local submission.
    pub(crate) fn connect_plain(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self, SmtpError> {
        Ok(Self {
            host: host.to_string(),
            stream: SmtpStream::connect(host, port, timeout)?,
            extensions: HashMap::new(),
            closed: false,
        })
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    pub(crate) fn extension(&self, name: &str) -> Option<&str> {
        self.extensions
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub(crate) fn command(&mut self, command: &str, expect: u16) -> Result<SmtpReply, SmtpError> {
        self.exchange(command, command, expect)
    }

    /// Like [`Self::command`], logging `shown` in place of the actual line.
    fn exchange(
        &mut self,
        command: &str,
        shown: &str,
        expect: u16,
    ) -> Result<SmtpReply, SmtpError> {
        debug!(host = %self.host, "C: {shown}");
        self.stream.send_command(command)?;
        let reply = self.stream.read_reply()?;
        debug!(host = %self.host, code = reply.code, "S: {}", reply.message());
        if code_matches(reply.code, expect) {
            Ok(reply)
        } else {
            Err(SmtpError::Reply {
                code: reply.code,
                message: reply.message(),
            })
        }
    }

    pub(crate) fn read_greeting(&mut self) -> Result<SmtpReply, SmtpError> {
        let reply = self.stream.read_reply()?;
        if reply.code != 220 {
            return Err(SmtpError::Reply {
                code: reply.code,
                message: reply.message(),
            });
        }
        Ok(reply)
    }

    /// EHLO, falling back to HELO when the server refuses the extended form.
    pub(crate) fn hello(&mut self, name: &str) -> Result<(), SmtpError> {
        match self.command(&format!("EHLO {name}"), 250) {
            Ok(reply) => {
                self.extensions = parse_extensions(&reply);
                Ok(())
            }
            Err(SmtpError::Reply { .. }) => {
                self.extensions.clear();
                self.command(&format!("HELO {name}"), 250).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Upgrade the plain session and greet again over TLS. Never called on a
    /// session that is already encrypted.
    pub(crate) fn starttls(
        &mut self,
        connector: &TlsConnector,
        helo: &str,
    ) -> Result<(), SmtpError> {
        if self.is_tls() {
            return Err(SmtpError::Protocol("TLS already active".to_string()));
        }
        self.command("STARTTLS", 220)?;
        let host = self.host.clone();
        self.stream.upgrade_tls(&host, connector)?;
        self.hello(helo)
    }

    /// One `AUTH` exchange driven by `auth`. A mechanism failure or an
    /// unexpected reply code cancels the exchange with `*` before being
    /// reported.
    pub(crate) fn auth(&mut self, auth: &Authenticator) -> Result<(), SmtpError> {
        let server = ServerInfo {
            name: &self.host,
            tls: self.is_tls(),
        };
        let initial = auth.start(&server)?;
        let shown = format!("AUTH {}", auth.mechanism());
        let command = match initial {
            Some(resp) => format!("{shown} {}", BASE64.encode(resp)),
            None => shown.clone(),
        };
        let mut reply = self.exchange(&command, &shown, 0)?;
        loop {
            let next = match reply.code {
                334 => BASE64
                    .decode(reply.message().trim())
                    .map_err(|err| SmtpError::Protocol(format!("malformed AUTH challenge: {err}")))
                    .and_then(|challenge| auth.next(&challenge, true).map_err(SmtpError::from)),
                235 => auth
                    .next(reply.message().as_bytes(), false)
                    .map_err(SmtpError::from),
                code => Err(SmtpError::Reply {
                    code,
                    message: reply.message(),
                }),
            };
            let resp = match next {
                Ok(Some(resp)) => resp,
                Ok(None) => return Ok(()),
                Err(err) => {
                    let _ = self.command("*", 501);
                    return Err(err);
                }
            };
            reply = self.exchange(&BASE64.encode(resp), "<credentials>", 0)?;
        }
    }

    pub(crate) fn mail(&mut self, from: &str) -> Result<(), SmtpError> {
        let mut command = format!("MAIL FROM:<{from}>");
        if self.extension("8BITMIME").is_some() {
            command.push_str(" BODY=8BITMIME");
        }
        self.command(&command, 250).map(|_| ())
    }

    pub(crate) fn rcpt(&mut self, to: &str) -> Result<(), SmtpError> {
        self.command(&format!("RCPT TO:<{to}>"), 25).map(|_| ())
    }

    pub(crate) fn data(&mut self) -> Result<DataWriter<'_>, SmtpError> {
        self.command("DATA", 354)?;
        Ok(DataWriter {
            session: self,
            state: LineState::Start,
        })
    }

    /// Send QUIT and read its reply. Anything other than 221 comes back as
    /// [`SmtpError::Reply`] so the caller can classify it. Once a reply has
    /// been read the socket is closed here and not again on drop.
    pub(crate) fn quit(&mut self) -> Result<(), SmtpError> {
        let result = self.command("QUIT", 221).map(|_| ());
        let completed = match &result {
            Ok(()) | Err(SmtpError::Reply { .. }) => true,
            Err(_) => false,
        };
        if completed {
            self.close();
        }
        result
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stream.transport.shutdown() {
            debug!(host = %self.host, "error closing connection: {err}");
        }
    }
}

impl Drop for SmtpSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_extensions(reply: &SmtpReply) -> HashMap<String, String> {
    reply
        .lines
        .iter()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.splitn(2, ' ');
            let keyword = parts.next()?.trim();
            if keyword.is_empty() {
                return None;
            }
            let params = parts.next().unwrap_or_default().trim().to_string();
            Some((keyword.to_ascii_uppercase(), params))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Start,
    Data,
    Cr,
}

/// Sink for the message body between `DATA` and the final `.`: bare LF
/// becomes CRLF and lines starting with `.` are dot-stuffed.
pub(crate) struct DataWriter<'a> {
    session: &'a mut SmtpSession,
    state: LineState,
}

impl DataWriter<'_> {
    pub(crate) fn write_all(&mut self, data: &[u8]) -> Result<(), SmtpError> {
        let (encoded, state) = dot_stuff(data, self.state);
        self.state = state;
        self.session.stream.write_all(&encoded)
    }

    /// Terminate the body and read the server's acknowledgment.
    pub(crate) fn close(self) -> Result<SmtpReply, SmtpError> {
        let trailer: &[u8] = match self.state {
            LineState::Start => b".\r\n",
            LineState::Cr => b"\n.\r\n",
            LineState::Data => b"\r\n.\r\n",
        };
        self.session.stream.write_all(trailer)?;
        let reply = self.session.stream.read_reply()?;
        debug!(host = %self.session.host, code = reply.code, "S: {}", reply.message());
        if reply.code == 250 {
            Ok(reply)
        } else {
            Err(SmtpError::Reply {
                code: reply.code,
                message: reply.message(),
            })
        }
    }
}

fn dot_stuff(data: &[u8], mut state: LineState) -> (Vec<u8>, LineState) {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 2);
    for &byte in data {
        match state {
            LineState::Start | LineState::Data => {
                if state == LineState::Start && byte == b'.' {
                    out.push(b'.');
                }
                state = LineState::Data;
                if byte == b'\r' {
                    state = LineState::Cr;
                } else if byte == b'\n' {
                    out.push(b'\r');
                    state = LineState::Start;
                }
            }
            LineState::Cr => {
                state = if byte == b'\n' {
                    LineState::Start
                } else {
                    LineState::Data
                };
            }
        }
        out.push(byte);
    }
    (out, state)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn dot_stuff_converts_bare_lf_and_escapes_dots() {
        let (out, state) = dot_stuff(b"a\n.b\r\n..c\r\n", LineState::Start);
        assert_eq!(out, b"a\r\n..b\r\n...c\r\n".to_vec());
        assert_eq!(state, LineState::Start);
    }

    #[test]
    fn dot_stuff_tracks_state_across_writes() {
        let (first, state) = dot_stuff(b"line\r", LineState::Start);
        assert_eq!(state, LineState::Cr);
        let (second, state) = dot_stuff(b"\n.", state);
        assert_eq!(first, b"line\r".to_vec());
        assert_eq!(second, b"\n..".to_vec());
        assert_eq!(state, LineState::Data);
    }

    #[test]
    fn endless_reply_line_is_a_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let upstream = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            // the client gives up before the server does
            let _ = stream.write_all(&vec![b'2'; 64 * 1024]);
        });

        let timeout = Some(Duration::from_secs(5));
        let mut stream = SmtpStream::connect("127.0.0.1", addr.port(), timeout).expect("connect");
        let err = stream.read_reply().expect_err("no line terminator");
        assert!(matches!(err, SmtpError::Protocol(_)), "{err}");
        drop(stream);
        upstream.join().expect("upstream thread");
    }

    #[test]
    fn code_matching_uses_prefixes() {
        assert!(code_matches(250, 250));
        assert!(code_matches(251, 25));
        assert!(!code_matches(550, 25));
        assert!(code_matches(221, 2));
        assert!(code_matches(334, 0));
        assert!(!code_matches(250, 221));
    }

    #[test]
    fn ehlo_extensions_are_keyed_upper_case() {
        let reply = SmtpReply {
            code: 250,
            lines: vec![
                "mock.smtp.server".to_string(),
                "starttls".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
                "SIZE 10240000".to_string(),
            ],
        };
        let ext = parse_extensions(&reply);
        assert_eq!(ext.get("STARTTLS").map(String::as_str), Some(""));
        assert_eq!(ext.get("AUTH").map(String::as_str), Some("PLAIN LOGIN"));
        assert_eq!(ext.get("SIZE").map(String::as_str), Some("10240000"));
        assert!(!ext.contains_key("MOCK.SMTP.SERVER"));
    }
}
