use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The protocol phase a session-side failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Connect,
    TlsHandshake,
    Authenticate,
    Enumerate,
    Fetch,
    Delete,
    Terminate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Phase::Connect => "connect",
            Phase::TlsHandshake => "TLS handshake",
            Phase::Authenticate => "authenticate",
            Phase::Enumerate => "enumerate",
            Phase::Fetch => "fetch",
            Phase::Delete => "delete",
            Phase::Terminate => "terminate",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{phase} failed: {source}")]
    Conn {
        phase: Phase,
        #[source]
        source: io::Error,
    },
    #[error("{phase} failed: {message}")]
    Tls { phase: Phase, message: String },
    #[error("authenticate failed: {0}")]
    Auth(String),
    #[error("{phase} failed: {message}")]
    Protocol { phase: Phase, message: String },
    #[error("{phase} failed: {source}")]
    Io {
        phase: Phase,
        #[source]
        source: io::Error,
    },
    #[error("cannot write message to {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("session already closed")]
    SessionClosed,
}

impl Error {
    pub fn protocol(phase: Phase, message: impl Into<String>) -> Self {
        Error::Protocol {
            phase,
            message: message.into(),
        }
    }

    pub fn io(phase: Phase, source: io::Error) -> Self {
        Error::Io { phase, source }
    }

    /// The `sysexits.h` status the process should exit with.
    pub fn exit_code(&self) -> Sysexit {
        match *self {
            Error::Conn { .. } => EX_UNAVAILABLE,
            Error::Tls { .. } => EX_UNAVAILABLE,
            Error::Auth(_) => EX_NOPERM,
            Error::Protocol { .. } => EX_PROTOCOL,
            Error::Io { .. } => EX_IOERR,
            Error::Output { .. } => EX_CANTCREAT,
            Error::Config(_) => EX_CONFIG,
            Error::SessionClosed => EX_SOFTWARE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_OK: Sysexit = Sysexit(0);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_PROTOCOL: Sysexit = Sysexit(76);
pub const EX_NOPERM: Sysexit = Sysexit(77);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_the_failed_phase() {
        let err = Error::protocol(Phase::Enumerate, "-ERR mailbox locked");
        assert_eq!("enumerate failed: -ERR mailbox locked", err.to_string());

        let err = Error::Tls {
            phase: Phase::TlsHandshake,
            message: "certificate verify failed".to_owned(),
        };
        assert_eq!(
            "TLS handshake failed: certificate verify failed",
            err.to_string()
        );
    }

    #[test]
    fn fatal_categories_exit_non_zero() {
        let errors = vec![
            Error::Auth("-ERR invalid login".to_owned()),
            Error::Config("missing password".to_owned()),
            Error::io(
                Phase::Fetch,
                io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
            ),
            Error::SessionClosed,
        ];
        for err in errors {
            assert_ne!(EX_OK, err.exit_code());
        }
        assert_eq!(EX_CONFIG, Error::Config(String::new()).exit_code());
    }
}
