use std::io::{self, BufReader, Write};
use std::net::TcpStream;

use crate::command::{is_data_end, parse_path, read_bounded, read_line, split_command, unstuff};
use crate::envelope::{Envelope, MailAddress};

use super::{IntakeOptions, MessageHandler};

/// Read size used while discarding an oversized DATA section.
const DISCARD_CHUNK: usize = 8192;

/// Transaction state between MAIL and the end of DATA.
#[derive(Debug, Default)]
struct Transaction {
    sender: Option<MailAddress>,
    recipients: Vec<MailAddress>,
}

pub(super) fn serve(
    stream: TcpStream,
    options: &IntakeOptions,
    handler: &dyn MessageHandler,
) -> io::Result<()> {
    stream.set_read_timeout(options.timeout)?;
    stream.set_write_timeout(options.timeout)?;
    let remote_ip = stream.peer_addr()?.ip().to_string();
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let mut reply = |line: &str| -> io::Result<()> {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\r\n")?;
        writer.flush()
    };

    reply(&format!("220 {} ESMTP mailrelay", options.hostname))?;
    let mut greeted = false;
    let mut txn = Transaction::default();

    while let Some(line) = read_line(&mut reader)? {
        let Some((verb, args)) = split_command(&line) else {
            reply("500 5.5.2 Syntax error, command unrecognized")?;
            continue;
        };
        match verb.as_str() {
            "HELO" => {
                greeted = true;
                txn = Transaction::default();
                reply(&format!("250 {}", options.hostname))?;
            }
            "EHLO" => {
                greeted = true;
                txn = Transaction::default();
                reply(&format!("250-{}", options.hostname))?;
                reply(&format!("250-SIZE {}", options.max_message_size))?;
                reply("250 8BITMIME")?;
            }
            "MAIL" if !greeted => reply("503 5.5.1 Send HELO/EHLO first")?,
            "MAIL" if txn.sender.is_some() => reply("503 5.5.1 Sender already specified")?,
            "MAIL" => match parse_mailbox(args, "FROM") {
                Some(sender) => {
                    txn.sender = Some(sender);
                    reply("250 2.1.0 OK")?;
                }
                None => reply("501 5.5.4 Syntax: MAIL FROM:<address>")?,
            },
            "RCPT" if txn.sender.is_none() => reply("503 5.5.1 Need MAIL before RCPT")?,
            "RCPT" => match parse_mailbox(args, "TO").filter(|rcpt| !rcpt.is_null()) {
                Some(rcpt) => {
                    txn.recipients.push(rcpt);
                    reply("250 2.1.5 OK")?;
                }
                None => reply("501 5.5.4 Syntax: RCPT TO:<address>")?,
            },
            "DATA" if txn.recipients.is_empty() => reply("503 5.5.1 Need RCPT before DATA")?,
            "DATA" => {
                reply("354 End data with <CR><LF>.<CR><LF>")?;
                let Some(body) = read_body(&mut reader, options.max_message_size)? else {
                    txn = Transaction::default();
                    reply("552 5.3.4 Message size exceeds fixed maximum message size")?;
                    continue;
                };
                let txn = std::mem::take(&mut txn);
                let envelope = Envelope {
                    sender: txn.sender.unwrap_or_default(),
                    recipients: txn.recipients,
                    body,
                    remote_ip: remote_ip.clone(),
                };
                reply(&handler.handle(&envelope).to_string())?;
            }
            "RSET" => {
                txn = Transaction::default();
                reply("250 2.0.0 OK")?;
            }
            "NOOP" => reply("250 2.0.0 OK")?,
            "QUIT" => {
                reply("221 2.0.0 Bye")?;
                return Ok(());
            }
            _ => reply("500 5.5.2 Command not recognized")?,
        }
    }
    Ok(())
}

fn parse_mailbox(args: &str, keyword: &str) -> Option<MailAddress> {
    parse_path(args, keyword)?.parse().ok()
}

/// Collect the DATA section as raw octets. `None` when it grew past `limit`;
/// the rest of the section is still consumed, in bounded chunks, so the
/// connection stays in sync without buffering the excess.
fn read_body(reader: &mut BufReader<TcpStream>, limit: usize) -> io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    let mut oversized = false;
    let mut at_line_start = true;
    loop {
        // room for the rest of the body plus a `.<CR><LF>` terminator
        let budget = if oversized {
            DISCARD_CHUNK
        } else {
            limit.saturating_sub(body.len()).saturating_add(3)
        };
        let Some(chunk) = read_bounded(reader, budget)? else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during DATA",
            ));
        };
        let complete = chunk.ends_with(b"\n");
        if at_line_start && complete && is_data_end(&chunk) {
            break;
        }
        let piece = if at_line_start { unstuff(&chunk) } else { &chunk[..] };
        if !oversized && body.len() + piece.len() > limit {
            oversized = true;
            body = Vec::new();
        }
        if !oversized {
            body.extend_from_slice(piece);
        }
        at_line_start = complete;
    }
    Ok((!oversized).then_some(body))
}
