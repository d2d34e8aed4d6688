use std::fmt;

use lazy_static::lazy_static;
use openssl::sha::sha256;
use regex::bytes::Regex;

lazy_static! {
    static ref MESSAGE_ID: Regex =
        Regex::new(r"(?i-u)^message-id:[ \t]*(.*)$").unwrap();
}

/// The deduplication key of a message.
///
/// Normally the value of the `Message-ID` header. Messages without one are
/// keyed by a digest of their raw content instead, which still recognises
/// the same download across runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageIdentifier(String);

impl MessageIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        MessageIdentifier(id.into())
    }

    pub fn extract(raw: &[u8]) -> Self {
        match header_message_id(raw) {
            Some(id) => MessageIdentifier(id),
            None => MessageIdentifier(format!("sha256:{}", hex(&sha256(raw)))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name the message is stored under in the output directory.
    ///
    /// Identifiers may contain anything, so the name is derived from their
    /// digest; the same identifier always maps to the same file.
    pub fn file_name(&self) -> String {
        format!(
            "{}.eml",
            base64::encode_config(
                &sha256(self.0.as_bytes()),
                base64::URL_SAFE_NO_PAD
            )
        )
    }
}

impl fmt::Display for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finds the `Message-ID` header in the header section of `raw`, unfolding
/// continuation lines.
fn header_message_id(raw: &[u8]) -> Option<String> {
    let mut lines = raw
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .take_while(|line| !line.is_empty())
        .peekable();

    while let Some(line) = lines.next() {
        let first = match MESSAGE_ID.captures(line) {
            Some(cap) => cap.get(1).map_or(&b""[..], |m| m.as_bytes()),
            None => continue,
        };

        let mut value = first.to_vec();
        while let Some(cont) = lines.peek() {
            if !cont.starts_with(b" ") && !cont.starts_with(b"\t") {
                break;
            }
            value.push(b' ');
            value.extend_from_slice(cont);
            lines.next();
        }

        let value = String::from_utf8_lossy(&value).trim().to_owned();
        if !value.is_empty() {
            return Some(value);
        }
    }

    None
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_message_id_header_returns_its_value() {
        let raw = b"From: a@example.com\r\n\
                    Message-ID: <1234@example.com>\r\n\
                    Subject: hi\r\n\
                    \r\n\
                    body\r\n";
        assert_eq!(
            "<1234@example.com>",
            MessageIdentifier::extract(raw).as_str()
        );
    }

    #[test]
    fn extract_header_name_is_case_insensitive() {
        let raw = b"message-id:   <abc@host>  \r\n\r\n";
        assert_eq!("<abc@host>", MessageIdentifier::extract(raw).as_str());
    }

    #[test]
    fn extract_folded_header_is_unfolded() {
        let raw = b"Message-Id:\r\n <folded@example.com>\r\nTo: b\r\n\r\n";
        assert_eq!(
            "<folded@example.com>",
            MessageIdentifier::extract(raw).as_str()
        );
    }

    #[test]
    fn extract_header_in_body_is_ignored() {
        let raw = b"Subject: fwd\r\n\r\nMessage-ID: <quoted@example.com>\r\n";
        let id = MessageIdentifier::extract(raw);
        assert!(id.as_str().starts_with("sha256:"));
        assert_eq!(71, id.as_str().len());
    }

    #[test]
    fn extract_without_header_is_stable_digest() {
        let raw = b"Subject: no id\r\n\r\nbody\r\n";
        assert_eq!(
            MessageIdentifier::extract(raw),
            MessageIdentifier::extract(raw)
        );
        assert_ne!(
            MessageIdentifier::extract(raw),
            MessageIdentifier::extract(b"Subject: other\r\n\r\nbody\r\n")
        );
    }

    #[test]
    fn file_name_is_stable_and_path_safe() {
        let id = MessageIdentifier::new("<../../etc/passwd@evil>");
        let name = id.file_name();
        assert_eq!(name, id.file_name());
        assert!(name.ends_with(".eml"));
        assert!(!name.contains('/'));
        assert_ne!(name, MessageIdentifier::new("<other@host>").file_name());
    }
}
