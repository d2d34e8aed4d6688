//! The byte transport under a POP3 session: a TCP socket, optionally
//! wrapped in TLS either from the first byte or after `STLS`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::mem;
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;

use log::{debug, info};
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslStream};
use openssl::x509::X509VerifyResult;

use crate::codec;
use crate::error::{Error, Phase, Result};

/// Bounds every read from the socket.
pub const MAX_PACKET_SIZE: usize = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsMode {
    Plain,
    /// TLS from the first byte, usually on port 995.
    Implicit,
    /// Plain connection upgraded with `STLS` after the greeting.
    StartTls,
}

impl TlsMode {
    pub fn default_port(self) -> u16 {
        match self {
            TlsMode::Implicit => 995,
            TlsMode::Plain | TlsMode::StartTls => 110,
        }
    }
}

/// Where to find the certificates the server chain is validated against.
/// With neither set, the system default locations are used.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustStore {
    pub cert_file: Option<PathBuf>,
    pub cert_dir: Option<PathBuf>,
}

/// A bidirectional byte stream a session runs over.
pub trait Transport: BufRead + Write {
    /// Closes the stream. Closing twice is a no-op.
    fn close(&mut self);
}

pub enum TCPStreamType {
    Plain(BufReader<TcpStream>),
    SSL(BufReader<SslStream<TcpStream>>),
    Closed,
}

/// An established connection whose greeting has been consumed.
pub struct Connection {
    pub stream: TCPStreamType,
    pub tls: bool,
    pub greeting: String,
}

/// Opens the one socket of a session and brings it to the point where the
/// server is ready for `USER`.
pub fn connect(
    host: &str,
    port: u16,
    mode: TlsMode,
    trust: &TrustStore,
) -> Result<Connection> {
    info!("Connecting to {} at port {}...", host, port);
    let tcp = TcpStream::connect((host, port)).map_err(|e| Error::Conn {
        phase: Phase::Connect,
        source: e,
    })?;

    match mode {
        TlsMode::Plain => {
            let mut stream = TCPStreamType::Plain(BufReader::with_capacity(
                MAX_PACKET_SIZE,
                tcp,
            ));
            let greeting = read_greeting(&mut stream)?;
            Ok(Connection {
                stream,
                tls: false,
                greeting,
            })
        }

        TlsMode::Implicit => {
            let ssl = handshake(host, tcp, trust)?;
            let mut stream = TCPStreamType::SSL(BufReader::with_capacity(
                MAX_PACKET_SIZE,
                ssl,
            ));
            let greeting = read_greeting(&mut stream)?;
            Ok(Connection {
                stream,
                tls: true,
                greeting,
            })
        }

        TlsMode::StartTls => {
            let mut reader = BufReader::with_capacity(MAX_PACKET_SIZE, tcp);
            let greeting = read_greeting(&mut reader)?;

            let tls_err = |e: io::Error| Error::Conn {
                phase: Phase::TlsHandshake,
                source: e,
            };
            codec::send_command(reader.get_mut(), "STLS", None)
                .map_err(tls_err)?;
            let response =
                codec::read_response(&mut reader, false).map_err(tls_err)?;
            if !response.is_ok() {
                return Err(tls_error(format!(
                    "server refused STLS: {}",
                    response.status_line()
                )));
            }
            // Anything the server sent after its STLS reply arrived before
            // the handshake and must not be trusted.
            if !reader.buffer().is_empty() {
                return Err(tls_error(
                    "server sent data before the TLS handshake",
                ));
            }

            let ssl = handshake(host, reader.into_inner(), trust)?;
            Ok(Connection {
                stream: TCPStreamType::SSL(BufReader::with_capacity(
                    MAX_PACKET_SIZE,
                    ssl,
                )),
                tls: true,
                greeting,
            })
        }
    }
}

fn read_greeting<R: BufRead>(reader: &mut R) -> Result<String> {
    let response = codec::read_response(reader, false).map_err(|e| {
        Error::Conn {
            phase: Phase::Connect,
            source: e,
        }
    })?;
    if !response.is_ok() {
        let reason = match response.status_text() {
            "" => response.status_line(),
            text => text,
        };
        return Err(Error::Conn {
            phase: Phase::Connect,
            source: io::Error::new(
                io::ErrorKind::InvalidData,
                format!("server rejected the connection: {}", reason),
            ),
        });
    }
    debug!("Got response from server: {}", response.status_line());
    Ok(response.status_line().to_owned())
}

fn handshake(
    host: &str,
    tcp: TcpStream,
    trust: &TrustStore,
) -> Result<SslStream<TcpStream>> {
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|e| tls_error(e.to_string()))?;
    if trust.cert_file.is_some() || trust.cert_dir.is_some() {
        builder
            .load_verify_locations(
                trust.cert_file.as_deref(),
                trust.cert_dir.as_deref(),
            )
            .map_err(|e| {
                tls_error(format!("cannot load trust store: {}", e))
            })?;
    }

    // The connector verifies the peer chain and host name; any failure
    // aborts the session.
    builder
        .build()
        .connect(host, tcp)
        .map_err(|e| match e {
            HandshakeError::SetupFailure(es) => tls_error(es.to_string()),
            HandshakeError::Failure(f) => {
                let verify = f.ssl().verify_result();
                let e = f.into_error();
                if X509VerifyResult::OK == verify {
                    tls_error(e.to_string())
                } else {
                    tls_error(format!("{} ({})", e, verify))
                }
            }
            HandshakeError::WouldBlock(_) => {
                tls_error("handshake interrupted")
            }
        })
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::Tls {
        phase: Phase::TlsHandshake,
        message: message.into(),
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection already closed")
}

impl TCPStreamType {
    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        matches!(*self, TCPStreamType::Closed)
    }

    /// Closes the connection. Closing twice is a no-op.
    pub fn shutdown(&mut self) {
        match mem::replace(self, TCPStreamType::Closed) {
            TCPStreamType::Plain(reader) => {
                let _ = reader.get_ref().shutdown(Shutdown::Both);
            }
            TCPStreamType::SSL(reader) => {
                let mut ssl = reader.into_inner();
                let _ = ssl.shutdown();
                let _ = ssl.get_ref().shutdown(Shutdown::Both);
            }
            TCPStreamType::Closed => (),
        }
    }
}

impl Transport for TCPStreamType {
    fn close(&mut self) {
        self.shutdown();
    }
}

impl Read for TCPStreamType {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            TCPStreamType::Plain(ref mut r) => r.read(buf),
            TCPStreamType::SSL(ref mut r) => r.read(buf),
            TCPStreamType::Closed => Err(not_connected()),
        }
    }
}

impl BufRead for TCPStreamType {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match *self {
            TCPStreamType::Plain(ref mut r) => r.fill_buf(),
            TCPStreamType::SSL(ref mut r) => r.fill_buf(),
            TCPStreamType::Closed => Err(not_connected()),
        }
    }

    fn consume(&mut self, amt: usize) {
        match *self {
            TCPStreamType::Plain(ref mut r) => r.consume(amt),
            TCPStreamType::SSL(ref mut r) => r.consume(amt),
            TCPStreamType::Closed => (),
        }
    }
}

impl Write for TCPStreamType {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            TCPStreamType::Plain(ref mut r) => r.get_mut().write(buf),
            TCPStreamType::SSL(ref mut r) => r.get_mut().write(buf),
            TCPStreamType::Closed => Err(not_connected()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            TCPStreamType::Plain(ref mut r) => r.get_mut().flush(),
            TCPStreamType::SSL(ref mut r) => r.get_mut().flush(),
            TCPStreamType::Closed => Err(not_connected()),
        }
    }
}
