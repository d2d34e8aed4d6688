//! Framing of the POP3 byte stream into responses.
//!
//! A response starts with a status line. Commands that expect a multi-line
//! answer (`RETR` and friends) are followed, after a successful status line,
//! by body lines terminated by a line holding a single period. Body lines
//! which the server period-stuffed are unstuffed here, so callers only ever
//! see the original content.

use std::io::{self, BufRead, Write};

use log::trace;

const DOT: u8 = 0x2E;
const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

const STATUS_OK: &[u8] = b"+OK";

/// A complete answer to one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerResponse {
    ok: bool,
    status_line: String,
    lines: Vec<Vec<u8>>,
}

impl ServerResponse {
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// The status line without its line terminator.
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// The text following the `+OK`/`-ERR` marker.
    pub fn status_text(&self) -> &str {
        match self.status_line.find(' ') {
            Some(ix) => &self.status_line[ix + 1..],
            None => "",
        }
    }

    /// Body lines of a multi-line response, unstuffed and without CRLF.
    #[cfg(test)]
    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    /// Reassembles the body lines into the raw content, CRLF separated.
    pub fn into_body(self) -> Vec<u8> {
        let len: usize = self.lines.iter().map(|l| l.len() + 2).sum();
        let mut body = Vec::with_capacity(len);
        for line in self.lines {
            body.extend_from_slice(&line);
            body.extend_from_slice(b"\r\n");
        }
        body
    }
}

/// Returns whether `response` signals success, ie, starts with `+OK`.
pub fn check_response_state(response: &[u8]) -> bool {
    response.starts_with(STATUS_OK)
}

/// Removes the extra period the server adds in front of body lines that
/// start with two periods.
pub fn unstuff(line: &[u8]) -> &[u8] {
    if line.starts_with(&[DOT, DOT]) {
        &line[1..]
    } else {
        line
    }
}

/// Reads one response from `reader`.
///
/// The body is only read when `multi_line` is set and the status line
/// reports success; servers do not send a body after `-ERR`.
pub fn read_response<R: BufRead>(
    reader: &mut R,
    multi_line: bool,
) -> io::Result<ServerResponse> {
    let mut buff = Vec::new();
    read_line(reader, &mut buff)?;
    trace!("S: {}", String::from_utf8_lossy(&buff));

    let ok = check_response_state(&buff);
    let status_line = String::from_utf8_lossy(&buff).into_owned();
    let mut lines = Vec::new();

    if ok && multi_line {
        loop {
            buff.clear();
            read_line(reader, &mut buff)?;
            if buff == [DOT] {
                break;
            }
            lines.push(unstuff(&buff).to_vec());
        }
        trace!("S: <{} body lines>", lines.len());
    }

    Ok(ServerResponse {
        ok,
        status_line,
        lines,
    })
}

/// Writes `command` followed by its optional argument and CRLF.
///
/// The whole line is handed to the writer in one piece; a writer that
/// cannot take all of it fails the exchange.
pub fn send_command<W: Write>(
    writer: &mut W,
    command: &str,
    param: Option<&str>,
) -> io::Result<()> {
    let line = match param {
        Some(x) => format!("{} {}\r\n", command, x),
        None => format!("{}\r\n", command),
    };
    match (command, param) {
        ("PASS", Some(_)) => trace!("C: PASS ********"),
        _ => trace!("C: {}", line.trim_end()),
    }
    writer.write_all(line.as_bytes())?;
    writer.flush()
}

/// Reads a single line into `dst`, stripping the CRLF (or bare LF).
///
/// Hitting EOF before the line terminator is an error: the server never
/// closes the connection in the middle of a response.
fn read_line<R: BufRead>(reader: &mut R, dst: &mut Vec<u8>) -> io::Result<()> {
    let nread = reader.read_until(LF, dst)?;
    if 0 == nread || Some(&LF) != dst.last() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed in the middle of a response",
        ));
    }

    dst.pop();
    if Some(&CR) == dst.last() {
        dst.pop();
    }
    Ok(())
}
