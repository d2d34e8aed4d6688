use std::collections::HashSet;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;

use crate::message::MessageIdentifier;

/// Default name of the store, relative to the working directory.
pub const OLDMAILS: &str = ".oldmails";

/// The identifiers of every message downloaded by a previous run.
///
/// On disk this is a plain text file with one identifier per line, kept in
/// the order identifiers were first recorded. Duplicate lines are tolerated
/// when loading.
pub struct OldMails {
    path: PathBuf,
    seen: HashSet<MessageIdentifier>,
    order: Vec<MessageIdentifier>,
    dirty: bool,
}

impl OldMails {
    /// Loads the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut store = OldMails {
            path,
            seen: HashSet::new(),
            order: Vec::new(),
            dirty: false,
        };

        let data = match fs::read(&store.path) {
            Ok(data) => data,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                debug!("No {} yet, starting empty", store.path.display());
                return Ok(store);
            }
            Err(e) => return Err(e),
        };

        for line in String::from_utf8_lossy(&data).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let id = MessageIdentifier::new(line);
            if store.seen.insert(id.clone()) {
                store.order.push(id);
            }
        }

        debug!(
            "Loaded {} known message ids from {}",
            store.order.len(),
            store.path.display()
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &MessageIdentifier) -> bool {
        self.seen.contains(id)
    }

    /// Adds `id` to the in-memory set. Returns whether it was not already
    /// present. Nothing reaches the disk before `flush()`.
    pub fn record(&mut self, id: MessageIdentifier) -> bool {
        if self.seen.insert(id.clone()) {
            self.order.push(id);
            self.dirty = true;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether identifiers were recorded since the last load or flush.
    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the store back to its file.
    ///
    /// The new content goes to a temporary file in the same directory which
    /// then replaces the store, so a crash leaves either the old or the new
    /// version. An unchanged store is not rewritten, and in particular no
    /// file is created for a session that recorded nothing.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmpfile = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmpfile.as_file());
            for id in &self.order {
                writeln!(writer, "{}", id)?;
            }
            writer.flush()?;
        }
        tmpfile.as_file().sync_all()?;
        tmpfile.persist(&self.path).map_err(|e| e.error)?;

        self.dirty = false;
        debug!(
            "Stored {} message ids to {}",
            self.order.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn id(s: &str) -> MessageIdentifier {
        MessageIdentifier::new(s)
    }

    #[test]
    fn load_missing_file_is_empty_store() {
        let root = tempfile::tempdir().unwrap();
        let store = OldMails::load(root.path().join(OLDMAILS)).unwrap();
        assert!(store.is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn load_duplicates_and_blank_lines_are_collapsed() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join(OLDMAILS);
        fs::write(&path, "<a@x>\n\n<b@x>\r\n<a@x>\n").unwrap();

        let store = OldMails::load(&path).unwrap();
        assert_eq!(2, store.len());
        assert!(store.contains(&id("<a@x>")));
        assert!(store.contains(&id("<b@x>")));
        assert!(!store.contains(&id("<c@x>")));
    }

    #[test]
    fn record_new_id_becomes_member() {
        let root = tempfile::tempdir().unwrap();
        let mut store = OldMails::load(root.path().join(OLDMAILS)).unwrap();

        assert!(!store.contains(&id("<x@y>")));
        assert!(store.record(id("<x@y>")));
        assert!(store.contains(&id("<x@y>")));
        assert!(store.is_dirty());
        assert!(!store.record(id("<x@y>")));
        assert_eq!(1, store.len());
    }

    #[test]
    fn flush_unchanged_store_creates_no_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join(OLDMAILS);
        let mut store = OldMails::load(&path).unwrap();
        store.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn flush_preserves_append_order_and_existing_ids() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join(OLDMAILS);
        fs::write(&path, "<old@x>\n").unwrap();

        let mut store = OldMails::load(&path).unwrap();
        store.record(id("<new2@x>"));
        store.record(id("<new1@x>"));
        store.flush().unwrap();
        assert!(!store.is_dirty());

        assert_eq!(
            "<old@x>\n<new2@x>\n<new1@x>\n",
            fs::read_to_string(&path).unwrap()
        );
        // Only the store itself is left behind.
        assert_eq!(1, fs::read_dir(root.path()).unwrap().count());
    }

    #[test]
    fn flush_unwritable_directory_reports_error() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("missing").join(OLDMAILS);
        let mut store = OldMails::load(&path).unwrap();
        store.record(id("<a@x>"));
        assert!(store.flush().is_err());
        assert!(store.is_dirty());
    }

    proptest! {
        #[test]
        fn flush_then_load_preserves_membership(
            ids in prop::collection::vec("<[a-z0-9.]{1,10}@[a-z]{1,6}>", 0..30),
        ) {
            let root = tempfile::tempdir().unwrap();
            let path = root.path().join(OLDMAILS);

            let mut store = OldMails::load(&path).unwrap();
            for s in &ids {
                store.record(id(s));
            }
            store.flush().unwrap();

            let reloaded = OldMails::load(&path).unwrap();
            let expected: BTreeSet<&str> =
                ids.iter().map(|s| s.as_str()).collect();
            prop_assert_eq!(expected.len(), reloaded.len());
            for s in &ids {
                prop_assert!(reloaded.contains(&id(s)));
            }
        }
    }
}
