use crate::defs::ObjectKind;
use crate::record::{ObjectKey, StoredAttr};
use crate::store::memory::MemoryStore;
use crate::store::{AttrCursor, AttrStore, DeleteStatus, UpdateStatus};
use crate::{Error, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions, rename};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};

const JOURNAL_HEADER: &[u8] = b"pbsattr1";
const JOURNAL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[inline]
fn bincode_config() -> impl Options {
    bincode::DefaultOptions::new().allow_trailing_bytes()
}

#[derive(Serialize, Deserialize, Debug)]
enum JournalEntry {
    Insert {
        key: ObjectKey,
        records: Vec<StoredAttr>,
    },
    Update {
        key: ObjectKey,
        record: StoredAttr,
    },
    Delete {
        key: ObjectKey,
        name: String,
        resource: String,
    },
    DeleteObject {
        key: ObjectKey,
    },
}

/// Attribute store persisted as an append-only journal of record operations.
///
/// The journal is replayed into memory on open. Every operation is flushed before it is
/// applied, so an acknowledged write survives a restart.
pub struct JournalStore {
    path: PathBuf,
    file: BufWriter<File>,
    state: MemoryStore,
}

impl JournalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let mut state = MemoryStore::default();
        let valid_len = if path.exists() {
            Some(replay(path, &mut state)?)
        } else {
            None
        };
        let file = open_for_append(path, valid_len)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the journal so that it contains only the live records.
    pub fn compact(&mut self) -> Result<()> {
        self.file.flush()?;
        let mut tmp_path: OsString = self.path.clone().into();
        tmp_path.push(".tmp");
        let tmp_path: PathBuf = tmp_path.into();
        {
            let mut tmp = open_for_append(&tmp_path, Some(0))?;
            for (key, records) in self.state.objects() {
                write_entry(
                    &mut tmp,
                    &JournalEntry::Insert {
                        key: key.clone(),
                        records: records.clone(),
                    },
                )?;
            }
            tmp.flush()?;
        }
        rename(&tmp_path, &self.path)?;
        self.file = open_for_append(&self.path, None)?;
        log::debug!("Journal {} compacted", self.path.display());
        Ok(())
    }

    fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        write_entry(&mut self.file, entry)?;
        self.file.flush()?;
        Ok(())
    }
}

fn write_entry(file: &mut BufWriter<File>, entry: &JournalEntry) -> Result<()> {
    bincode_config().serialize_into(file, entry)?;
    Ok(())
}

/// Opens the journal for appending, truncating it to `truncate` bytes when given.
fn open_for_append(path: &Path, truncate: Option<u64>) -> Result<BufWriter<File>> {
    let mut raw_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    let position = if let Some(size) = truncate {
        raw_file.set_len(size)?;
        size
    } else {
        raw_file.metadata()?.len()
    };
    raw_file.seek(SeekFrom::Start(position))?;
    let mut file = BufWriter::new(raw_file);

    if position == 0 {
        file.write_all(JOURNAL_HEADER)?;
        bincode_config().serialize_into(&mut file, JOURNAL_VERSION)?;
        file.flush()?;
    }
    Ok(file)
}

/// Replays the journal into `state` and returns the length of its valid prefix.
fn replay(path: &Path, state: &mut MemoryStore) -> Result<u64> {
    let mut source = BufReader::new(File::open(path)?);
    let mut header = [0u8; 8];
    if source.read_exact(&mut header).is_err() {
        // Header was never fully written
        return Ok(0);
    }
    if header != JOURNAL_HEADER {
        return Err(Error::InvalidJournal(format!(
            "{} is not an attribute journal",
            path.display()
        )));
    }
    let version: String = bincode_config()
        .deserialize_from(&mut source)
        .map_err(|error| Error::InvalidJournal(format!("cannot read header: {error}")))?;
    if version != JOURNAL_VERSION {
        return Err(Error::InvalidJournal(format!(
            "version of journal {version} does not match with {JOURNAL_VERSION}"
        )));
    }

    let mut valid_len = source.stream_position()?;
    let mut entries = 0;
    loop {
        match bincode_config().deserialize_from::<_, JournalEntry>(&mut source) {
            Ok(entry) => {
                apply(state, entry);
                entries += 1;
                valid_len = source.stream_position()?;
            }
            Err(error) => match error.deref() {
                bincode::ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                _ => return Err(error.into()),
            },
        }
    }
    let file_len = source.get_ref().metadata()?.len();
    if file_len != valid_len {
        log::warn!(
            "Journal {} has {} bytes of incomplete data at the end, dropping them",
            path.display(),
            file_len - valid_len
        );
    }
    log::debug!("Replayed {entries} journal entries from {}", path.display());
    Ok(valid_len)
}

fn apply(state: &mut MemoryStore, entry: JournalEntry) {
    match entry {
        JournalEntry::Insert { key, records } => state.apply_insert(&key, &records),
        JournalEntry::Update { key, record } => {
            state.apply_update(&key, &record);
        }
        JournalEntry::Delete {
            key,
            name,
            resource,
        } => {
            state.apply_delete(&key, &name, &resource);
        }
        JournalEntry::DeleteObject { key } => {
            state.apply_delete_object(&key);
        }
    }
}

impl AttrStore for JournalStore {
    fn insert_batch(&mut self, key: &ObjectKey, records: Vec<StoredAttr>) -> Result<()> {
        self.append(&JournalEntry::Insert {
            key: key.clone(),
            records: records.clone(),
        })?;
        self.state.apply_insert(key, &records);
        Ok(())
    }

    fn insert(&mut self, key: &ObjectKey, record: &StoredAttr) -> Result<()> {
        self.insert_batch(key, vec![record.clone()])
    }

    fn update(&mut self, key: &ObjectKey, record: &StoredAttr) -> Result<UpdateStatus> {
        if !self
            .state
            .records(key)
            .iter()
            .any(|r| r.same_key(&record.name, record.resource()))
        {
            return Ok(UpdateStatus::NoRows);
        }
        self.append(&JournalEntry::Update {
            key: key.clone(),
            record: record.clone(),
        })?;
        Ok(self.state.apply_update(key, record))
    }

    fn delete(&mut self, key: &ObjectKey, name: &str, resource: &str) -> Result<DeleteStatus> {
        if !self
            .state
            .records(key)
            .iter()
            .any(|r| r.same_key(name, resource))
        {
            return Ok(DeleteStatus::NoRows);
        }
        self.append(&JournalEntry::Delete {
            key: key.clone(),
            name: name.to_string(),
            resource: resource.to_string(),
        })?;
        Ok(self.state.apply_delete(key, name, resource))
    }

    fn delete_object(&mut self, key: &ObjectKey) -> Result<DeleteStatus> {
        if self.state.records(key).is_empty() {
            return Ok(DeleteStatus::NoRows);
        }
        self.append(&JournalEntry::DeleteObject { key: key.clone() })?;
        Ok(self.state.apply_delete_object(key))
    }

    fn open_cursor<'a>(&'a self, key: &ObjectKey) -> Result<Box<dyn AttrCursor + 'a>> {
        self.state.open_cursor(key)
    }

    fn object_ids(&self, kind: ObjectKind) -> Vec<String> {
        self.state.object_ids(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrFlags;
    use std::fs::OpenOptions;

    fn key() -> ObjectKey {
        ObjectKey::new(ObjectKind::Job, "12.server")
    }

    fn read_all(store: &JournalStore) -> Vec<StoredAttr> {
        let mut cursor = store.open_cursor(&key()).unwrap();
        let mut out = Vec::new();
        while let Some(r) = cursor.next().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn reopen_replays_operations() {
        let tmpdir = tempfile::TempDir::with_prefix("pbs").unwrap();
        let path = tmpdir.path().join("attrs.journal");
        {
            let mut store = JournalStore::open(&path).unwrap();
            store
                .insert_batch(
                    &key(),
                    vec![
                        StoredAttr::new("comment", "a", AttrFlags::SET),
                        StoredAttr::new("Hold_Types", "u", AttrFlags::SET),
                    ],
                )
                .unwrap();
            store
                .update(&key(), &StoredAttr::new("comment", "b", AttrFlags::SET))
                .unwrap();
            store.delete(&key(), "Hold_Types", "").unwrap();
        }
        let store = JournalStore::open(&path).unwrap();
        let records = read_all(&store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "b");
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let tmpdir = tempfile::TempDir::with_prefix("pbs").unwrap();
        let path = tmpdir.path().join("attrs.journal");
        {
            let mut store = JournalStore::open(&path).unwrap();
            store
                .insert(&key(), &StoredAttr::new("comment", "a", AttrFlags::SET))
                .unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[1, 0]).unwrap();
        }
        let mut store = JournalStore::open(&path).unwrap();
        assert_eq!(read_all(&store).len(), 1);

        store
            .insert(&key(), &StoredAttr::new("Priority", "3", AttrFlags::SET))
            .unwrap();
        drop(store);
        let store = JournalStore::open(&path).unwrap();
        assert_eq!(read_all(&store).len(), 2);
    }

    #[test]
    fn invalid_header_is_rejected() {
        let tmpdir = tempfile::TempDir::with_prefix("pbs").unwrap();
        let path = tmpdir.path().join("attrs.journal");
        std::fs::write(&path, b"notajournal").unwrap();
        assert!(matches!(
            JournalStore::open(&path),
            Err(Error::InvalidJournal(_))
        ));
    }

    #[test]
    fn compact_keeps_live_records() {
        let tmpdir = tempfile::TempDir::with_prefix("pbs").unwrap();
        let path = tmpdir.path().join("attrs.journal");
        let mut store = JournalStore::open(&path).unwrap();
        for i in 0..50 {
            let record = StoredAttr::new("comment", format!("v{i}"), AttrFlags::SET);
            if store.update(&key(), &record).unwrap() == UpdateStatus::NoRows {
                store.insert(&key(), &record).unwrap();
            }
        }
        let other = ObjectKey::new(ObjectKind::Queue, "workq");
        store
            .insert(&other, &StoredAttr::new("enabled", "True", AttrFlags::SET))
            .unwrap();
        store.delete_object(&other).unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        store.compact().unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);

        drop(store);
        let store = JournalStore::open(&path).unwrap();
        let records = read_all(&store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "v49");
        assert!(store.object_ids(ObjectKind::Queue).is_empty());
    }
}
