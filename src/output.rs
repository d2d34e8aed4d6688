use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::message::MessageIdentifier;

/// Receives every message classified as new.
pub trait MailSink {
    fn store(&mut self, id: &MessageIdentifier, raw: &[u8]) -> Result<()>;
}

/// Writes each message to its own file in a directory.
#[derive(Debug)]
pub struct OutputDir {
    dir: PathBuf,
}

impl OutputDir {
    /// Checks that `dir` is an existing directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        match fs::metadata(&dir) {
            Ok(md) if md.is_dir() => Ok(OutputDir { dir }),
            Ok(_) => Err(Error::Config(format!(
                "{} is not a directory",
                dir.display()
            ))),
            Err(e) => Err(Error::Config(format!(
                "output directory {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl MailSink for OutputDir {
    fn store(&mut self, id: &MessageIdentifier, raw: &[u8]) -> Result<()> {
        let path = self.dir.join(id.file_name());
        let output_err = |e: io::Error| Error::Output {
            path: path.clone(),
            source: e,
        };

        let mut tmpfile =
            NamedTempFile::new_in(&self.dir).map_err(output_err)?;
        tmpfile.write_all(raw).map_err(output_err)?;
        tmpfile.persist(&path).map_err(|e| output_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_directory_is_config_error() {
        let root = tempfile::tempdir().unwrap();
        assert_matches!(
            Err(Error::Config(_)),
            OutputDir::open(root.path().join("nope"))
        );
    }

    #[test]
    fn open_regular_file_is_config_error() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file");
        fs::write(&file, b"").unwrap();
        assert_matches!(Err(Error::Config(_)), OutputDir::open(&file));
    }

    #[test]
    fn store_writes_raw_bytes_under_identifier_name() {
        let root = tempfile::tempdir().unwrap();
        let mut out = OutputDir::open(root.path()).unwrap();
        let id = MessageIdentifier::new("<1@example.com>");

        out.store(&id, b"Subject: a\r\n\r\nbody\r\n").unwrap();
        assert_eq!(
            b"Subject: a\r\n\r\nbody\r\n".to_vec(),
            fs::read(root.path().join(id.file_name())).unwrap()
        );
        assert_eq!(1, fs::read_dir(root.path()).unwrap().count());
    }

    #[test]
    fn store_vanished_directory_is_output_error() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("out");
        fs::create_dir(&dir).unwrap();
        let mut out = OutputDir::open(&dir).unwrap();
        fs::remove_dir(&dir).unwrap();

        assert_matches!(
            Err(Error::Output { .. }),
            out.store(&MessageIdentifier::new("<x@y>"), b"x")
        );
    }
}
