//! Parser for the authentication file.
//!
//! ```text
//! username = name
//! password = secret
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

lazy_static! {
    static ref ENTRY: Regex =
        Regex::new(r"^\s*(username|password)\s*=\s*(.*?)\s*$").unwrap();
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

pub fn parse_auth_file(path: &Path) -> Result<Credentials> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_credentials(&content).map_err(|msg| {
        Error::Config(format!("{}: {}", path.display(), msg))
    })
}

pub fn parse_credentials(
    content: &str,
) -> std::result::Result<Credentials, String> {
    let mut username = None;
    let mut password = None;

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let cap = ENTRY
            .captures(line)
            .ok_or_else(|| format!("line {}: malformed entry", lineno + 1))?;
        let slot = match &cap[1] {
            "username" => &mut username,
            _ => &mut password,
        };
        if slot.is_some() {
            return Err(format!(
                "line {}: duplicate {}",
                lineno + 1,
                &cap[1]
            ));
        }
        if cap[2].is_empty() {
            return Err(format!("line {}: empty {}", lineno + 1, &cap[1]));
        }
        *slot = Some(cap[2].to_owned());
    }

    match (username, password) {
        (Some(username), Some(password)) => {
            Ok(Credentials { username, password })
        }
        (None, _) => Err("missing username".to_owned()),
        (_, None) => Err("missing password".to_owned()),
    }
}
