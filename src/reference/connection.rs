use std::io::{self, BufReader, Write};
use std::net::TcpStream;
use std::thread;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, warn};

use crate::command::{
    MAX_COMMAND_LINE, is_data_end, parse_path, read_bounded, read_line, split_command, unstuff,
};
use crate::transport::Transport;

use super::{Shared, Transcript};

const SERVER_NAME: &str = "mock.smtp.server";

/// Serve one client until QUIT or a transport error, then hand the
/// transcript to the server-wide list.
pub(super) fn serve(shared: &Shared, stream: TcpStream) {
    let options = &shared.options;
    if !options.response_delay.is_zero() {
        thread::sleep(options.response_delay);
    }

    let mut transport = Transport::Plain(stream);
    let mut transcript = Transcript::default();
    if options.implicit_tls {
        match transport.accept_tls(&shared.acceptor) {
            Ok(true) => transcript.used_tls = true,
            Ok(false) | Err(_) => {
                debug!("implicit TLS handshake failed, dropping connection");
                return;
            }
        }
    }

    let mut conn = Connection {
        shared,
        reader: BufReader::new(transport),
        transcript,
        published: false,
    };
    if let Err(err) = conn.run() {
        debug!("connection ended: {err}");
    }
    if !conn.published {
        shared.record(conn.transcript);
    }
}

struct Connection<'a> {
    shared: &'a Shared,
    reader: BufReader<Transport>,
    transcript: Transcript,
    /// Set once QUIT has handed the transcript over.
    published: bool,
}

impl Connection<'_> {
    fn run(&mut self) -> io::Result<()> {
        self.reply(&format!("220 {SERVER_NAME} ESMTP ready"))?;
        loop {
            let Some(raw) = read_line(&mut self.reader)? else {
                return Ok(());
            };
            let line = raw.trim().to_string();
            self.transcript.commands.push(line.clone());
            let Some((verb, args)) = split_command(&line) else {
                continue;
            };

            if self.shared.options.fail_commands.contains(&verb) {
                self.reply("550 Command failed")?;
                continue;
            }
            if let Some(response) = self.shared.options.custom_responses.get(&verb) {
                self.reply(response)?;
                continue;
            }

            match verb.as_str() {
                "EHLO" | "HELO" => self.capabilities()?,
                "STARTTLS" => self.starttls()?,
                "AUTH" => self.auth(args)?,
                "MAIL" => self.mail(args)?,
                "RCPT" => self.rcpt(args)?,
                "DATA" => self.data()?,
                "QUIT" => return self.quit(),
                _ => self.reply("500 Command not recognized")?,
            }
        }
    }

    fn reply(&mut self, line: &str) -> io::Result<()> {
        let transport = self.reader.get_mut();
        transport.write_all(line.as_bytes())?;
        transport.write_all(b"\r\n")?;
        transport.flush()
    }

    fn read_trimmed(&mut self) -> io::Result<String> {
        read_line(&mut self.reader)?
            .map(|line| line.trim().to_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"))
    }

    fn capabilities(&mut self) -> io::Result<()> {
        let options = &self.shared.options;
        let mut lines = vec![format!("250-{SERVER_NAME}")];
        if options.starttls {
            lines.push("250-STARTTLS".to_string());
        }
        if options.auth {
            lines.push(if options.login {
                "250-AUTH PLAIN LOGIN".to_string()
            } else {
                "250-AUTH PLAIN".to_string()
            });
        }
        lines.push("250 SIZE 10240000".to_string());
        for line in lines {
            self.reply(&line)?;
        }
        Ok(())
    }

    fn starttls(&mut self) -> io::Result<()> {
        self.reply("220 Ready to start TLS")?;
        // drop anything pipelined in clear text before the handshake
        let reader = std::mem::replace(&mut self.reader, BufReader::new(Transport::Invalid));
        let mut transport = reader.into_inner();
        if transport.accept_tls(&self.shared.acceptor)? {
            self.transcript.used_tls = true;
        } else {
            warn!("STARTTLS handshake failed, staying in plain text");
        }
        self.reader = BufReader::new(transport);
        Ok(())
    }

    fn auth(&mut self, args: &str) -> io::Result<()> {
        let mut parts = args.split_whitespace();
        let Some(mechanism) = parts.next() else {
            self.reply("501 Syntax error")?;
            return Ok(());
        };
        match mechanism.to_ascii_uppercase().as_str() {
            "PLAIN" => {
                let encoded = match parts.next() {
                    Some(inline) => inline.to_string(),
                    None => {
                        self.reply("334 ")?;
                        self.read_trimmed()?
                    }
                };
                let (user, pass) = decode_plain(&encoded);
                self.transcript.auth_user = user;
                self.transcript.auth_pass = pass;
                self.reply("235 Authentication successful")?;
            }
            "LOGIN" => {
                let (user_prompt, pass_prompt) = self.shared.options.login_prompts.clone();
                self.reply(&format!("334 {}", BASE64.encode(user_prompt)))?;
                let user = self.read_trimmed()?;
                if user == "*" {
                    self.reply("501 Authentication cancelled")?;
                    return Ok(());
                }
                self.reply(&format!("334 {}", BASE64.encode(pass_prompt)))?;
                let pass = self.read_trimmed()?;
                if pass == "*" {
                    self.reply("501 Authentication cancelled")?;
                    return Ok(());
                }
                self.transcript.auth_user = decode_or_raw(&user);
                self.transcript.auth_pass = decode_or_raw(&pass);
                self.reply("235 Authentication successful")?;
            }
            _ => self.reply("504 Authentication mechanism not supported")?,
        }
        Ok(())
    }

    fn mail(&mut self, args: &str) -> io::Result<()> {
        match parse_path(args, "FROM") {
            Some(from) => {
                self.transcript.from = from;
                self.reply("250 OK")?;
            }
            None => self.reply("501 Syntax error")?,
        }
        Ok(())
    }

    fn rcpt(&mut self, args: &str) -> io::Result<()> {
        match parse_path(args, "TO") {
            Some(to) => {
                self.transcript.to.push(to);
                self.reply("250 OK")?;
            }
            None => self.reply("501 Syntax error")?,
        }
        Ok(())
    }

    fn data(&mut self) -> io::Result<()> {
        self.reply("354 Start mail input; end with <CRLF>.<CRLF>")?;
        let mut body = Vec::new();
        let mut at_line_start = true;
        while let Some(chunk) = read_bounded(&mut self.reader, MAX_COMMAND_LINE)? {
            let complete = chunk.ends_with(b"\n");
            if at_line_start && complete && is_data_end(&chunk) {
                break;
            }
            body.extend_from_slice(if at_line_start { unstuff(&chunk) } else { &chunk[..] });
            at_line_start = complete;
        }
        self.transcript.data = String::from_utf8_lossy(&body).into_owned();
        self.reply("250 OK: message accepted")?;
        Ok(())
    }

    /// The transcript is published before the closing reply goes out so that
    /// a client returning from QUIT always finds it.
    fn quit(&mut self) -> io::Result<()> {
        self.shared.record(std::mem::take(&mut self.transcript));
        self.published = true;
        self.reply("221 Bye")
    }
}

fn decode_or_raw(line: &str) -> String {
    BASE64
        .decode(line)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| line.to_string())
}

/// `authzid NUL authcid NUL passwd`; anything else is recorded as an opaque
/// identity with no password.
fn decode_plain(encoded: &str) -> (String, String) {
    let decoded = BASE64
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    match decoded.as_deref().map(|text| text.split('\0').collect::<Vec<_>>()) {
        Some(fields) if fields.len() == 3 => (fields[1].to_string(), fields[2].to_string()),
        _ => (encoded.to_string(), String::new()),
    }
}
