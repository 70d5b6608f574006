use crate::defs::ObjectKind;
use crate::record::{ObjectKey, StoredAttr};
use crate::store::{AttrCursor, AttrStore, DeleteStatus, UpdateStatus};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// In-memory attribute store.
///
/// Also serves as the replayed state of [`super::JournalStore`]. A write budget can be set to
/// make writes fail after a given number of successful ones.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: BTreeMap<ObjectKey, Vec<StoredAttr>>,
    write_budget: Option<usize>,
    fail_cursors: bool,
    batch_inserts: usize,
}

impl MemoryStore {
    pub fn records(&self, key: &ObjectKey) -> &[StoredAttr] {
        self.objects.get(key).map(|r| r.as_slice()).unwrap_or(&[])
    }

    pub fn objects(&self) -> impl Iterator<Item = (&ObjectKey, &Vec<StoredAttr>)> {
        self.objects.iter()
    }

    /// `Some(n)` allows `n` more writes, every following write fails.
    pub fn set_write_budget(&mut self, budget: Option<usize>) {
        self.write_budget = budget;
    }

    pub fn set_fail_cursors(&mut self, value: bool) {
        self.fail_cursors = value;
    }

    pub fn batch_inserts(&self) -> usize {
        self.batch_inserts
    }

    fn check_write(&mut self) -> Result<()> {
        match &mut self.write_budget {
            Some(0) => Err(Error::StoreError("write rejected by store".to_string())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub(crate) fn apply_insert(&mut self, key: &ObjectKey, records: &[StoredAttr]) {
        self.objects
            .entry(key.clone())
            .or_default()
            .extend(records.iter().cloned());
    }

    pub(crate) fn apply_update(&mut self, key: &ObjectKey, record: &StoredAttr) -> UpdateStatus {
        let found = self.objects.get_mut(key).and_then(|records| {
            records
                .iter_mut()
                .find(|r| r.same_key(&record.name, record.resource()))
        });
        match found {
            Some(stored) => {
                *stored = record.clone();
                UpdateStatus::Updated
            }
            None => UpdateStatus::NoRows,
        }
    }

    pub(crate) fn apply_delete(
        &mut self,
        key: &ObjectKey,
        name: &str,
        resource: &str,
    ) -> DeleteStatus {
        let Some(records) = self.objects.get_mut(key) else {
            return DeleteStatus::NoRows;
        };
        let before = records.len();
        records.retain(|r| !r.same_key(name, resource));
        let deleted = records.len() != before;
        if records.is_empty() {
            self.objects.remove(key);
        }
        if deleted {
            DeleteStatus::Deleted
        } else {
            DeleteStatus::NoRows
        }
    }

    pub(crate) fn apply_delete_object(&mut self, key: &ObjectKey) -> DeleteStatus {
        match self.objects.remove(key) {
            Some(_) => DeleteStatus::Deleted,
            None => DeleteStatus::NoRows,
        }
    }

    fn contains(&self, key: &ObjectKey, name: &str, resource: &str) -> bool {
        self.records(key).iter().any(|r| r.same_key(name, resource))
    }
}

struct MemoryCursor<'a> {
    records: std::slice::Iter<'a, StoredAttr>,
    fail: bool,
}

impl AttrCursor for MemoryCursor<'_> {
    fn next(&mut self) -> Result<Option<StoredAttr>> {
        if self.fail {
            return Err(Error::StoreError("cursor read failed".to_string()));
        }
        Ok(self.records.next().cloned())
    }
}

impl AttrStore for MemoryStore {
    fn insert_batch(&mut self, key: &ObjectKey, records: Vec<StoredAttr>) -> Result<()> {
        self.check_write()?;
        self.batch_inserts += 1;
        self.apply_insert(key, &records);
        Ok(())
    }

    fn insert(&mut self, key: &ObjectKey, record: &StoredAttr) -> Result<()> {
        self.check_write()?;
        self.apply_insert(key, std::slice::from_ref(record));
        Ok(())
    }

    fn update(&mut self, key: &ObjectKey, record: &StoredAttr) -> Result<UpdateStatus> {
        if !self.contains(key, &record.name, record.resource()) {
            return Ok(UpdateStatus::NoRows);
        }
        self.check_write()?;
        Ok(self.apply_update(key, record))
    }

    fn delete(&mut self, key: &ObjectKey, name: &str, resource: &str) -> Result<DeleteStatus> {
        if !self.contains(key, name, resource) {
            return Ok(DeleteStatus::NoRows);
        }
        self.check_write()?;
        Ok(self.apply_delete(key, name, resource))
    }

    fn delete_object(&mut self, key: &ObjectKey) -> Result<DeleteStatus> {
        if !self.objects.contains_key(key) {
            return Ok(DeleteStatus::NoRows);
        }
        self.check_write()?;
        Ok(self.apply_delete_object(key))
    }

    fn open_cursor<'a>(&'a self, key: &ObjectKey) -> Result<Box<dyn AttrCursor + 'a>> {
        Ok(Box::new(MemoryCursor {
            records: self.records(key).iter(),
            fail: self.fail_cursors,
        }))
    }

    fn object_ids(&self, kind: ObjectKind) -> Vec<String> {
        self.objects
            .keys()
            .filter(|key| key.kind == kind)
            .map(|key| key.id.clone())
            .collect()
    }
}
