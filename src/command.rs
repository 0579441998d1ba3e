//! Server side parsing helpers shared by the reference server and the intake
//! listener.

use std::io::{self, BufRead, Read};

/// Split a command line into its upper-cased verb and the remaining
/// arguments. Returns `None` for a blank line.
pub(crate) fn split_command(line: &str) -> Option<(String, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    Some((verb.to_ascii_uppercase(), rest.trim_start()))
}

/// Extract the mailbox from `FROM:<addr> [params]` / `TO:<addr>`; the
/// keyword match is case-insensitive and a space after the colon is
/// tolerated. An empty path (`<>`) yields an empty string.
pub(crate) fn parse_path(args: &str, keyword: &str) -> Option<String> {
    let args = args.trim_start();
    let head = args.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = args[keyword.len()..].strip_prefix(':')?.trim_start();
    let path = match rest.strip_prefix('<') {
        Some(inner) => &inner[..inner.find('>')?],
        None => rest.split_whitespace().next().unwrap_or_default(),
    };
    Some(path.to_string())
}

/// Longest command line accepted before the connection is dropped.
pub(crate) const MAX_COMMAND_LINE: usize = 4096;

/// Read up to and including the next LF, but never more than `limit` bytes.
/// A result of `limit` bytes without a trailing LF is a truncated line.
/// `Ok(None)` means the peer closed the connection.
pub(crate) fn read_bounded<R: BufRead>(
    reader: &mut R,
    limit: usize,
) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let limit = u64::try_from(limit).unwrap_or(u64::MAX);
    if reader.by_ref().take(limit).read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(buf))
}

/// Read one command line including its terminator, replacing invalid UTF-8.
/// `Ok(None)` means the peer closed the connection.
pub(crate) fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let Some(buf) = read_bounded(reader, MAX_COMMAND_LINE)? else {
        return Ok(None);
    };
    if buf.len() == MAX_COMMAND_LINE && !buf.ends_with(b"\n") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "command line too long"));
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Undo transparency on a DATA line: a leading dot was doubled by the client.
pub(crate) fn unstuff(line: &[u8]) -> &[u8] {
    if line.starts_with(b"..") { &line[1..] } else { line }
}

/// Whether `line` is the lone `.` ending a DATA section.
pub(crate) fn is_data_end(line: &[u8]) -> bool {
    line.trim_ascii() == b"."
}
