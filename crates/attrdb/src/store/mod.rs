mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::MemoryStore;

use crate::attr::{AttrArray, AttrFlags};
use crate::codec::encode_attr;
use crate::defs::{AttrDefs, AttrKind, ObjectKind};
use crate::record::{ObjectKey, StoredAttr};
use crate::Result;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpdateStatus {
    Updated,
    /// Nothing matched, the record was never stored before.
    NoRows,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeleteStatus {
    Deleted,
    NoRows,
}

/// Iterates over the stored records of one object, in storage order.
///
/// The cursor is released when dropped.
pub trait AttrCursor {
    fn next(&mut self) -> Result<Option<StoredAttr>>;

    fn close(self: Box<Self>) {}
}

/// Record-level access to persisted object attributes.
///
/// Records are keyed by `(name, resource)` inside one object. Several records of one
/// attribute are returned by cursors in the order they were inserted.
pub trait AttrStore {
    /// Buffered multi-row insert used for newly created objects.
    fn insert_batch(&mut self, key: &ObjectKey, records: Vec<StoredAttr>) -> Result<()>;

    fn insert(&mut self, key: &ObjectKey, record: &StoredAttr) -> Result<()>;

    fn update(&mut self, key: &ObjectKey, record: &StoredAttr) -> Result<UpdateStatus>;

    fn delete(&mut self, key: &ObjectKey, name: &str, resource: &str) -> Result<DeleteStatus>;

    fn delete_object(&mut self, key: &ObjectKey) -> Result<DeleteStatus>;

    fn open_cursor<'a>(&'a self, key: &ObjectKey) -> Result<Box<dyn AttrCursor + 'a>>;

    fn object_ids(&self, kind: ObjectKind) -> Vec<String>;
}

/// Saves the attributes of one object.
///
/// A new object writes every set attribute in one batch. An existing object writes only
/// modified attributes, updating in place and inserting when the record did not exist; a
/// modified attribute that is no longer set is deleted from the store. Records of the unknown
/// slot keep their original names, so stored records that no longer appear in it are removed.
///
/// The first encode or store failure aborts the call. Records written before the failure
/// stay in the store.
pub fn save_attrs(
    store: &mut dyn AttrStore,
    key: &ObjectKey,
    defs: &AttrDefs,
    attrs: &mut AttrArray,
    is_new: bool,
) -> Result<()> {
    if is_new {
        let mut buffer = Vec::new();
        for (index, def) in defs.iter().enumerate() {
            buffer.extend(encode_attr(def, &attrs[index])?);
        }
        if !buffer.is_empty() {
            log::trace!("Inserting {} records of {key}", buffer.len());
            store.insert_batch(key, buffer)?;
        }
        for attr in attrs.iter_mut() {
            attr.flags.remove(AttrFlags::MODIFY | AttrFlags::MODCACHE);
        }
        return Ok(());
    }

    for (index, def) in defs.iter().enumerate() {
        let attr = &attrs[index];
        if !attr.is_modified() {
            continue;
        }
        if def.kind == AttrKind::Unknown {
            let current = encode_attr(def, attr)?;
            delete_stale_unknown(store, key, defs, &current)?;
            for record in current {
                if store.update(key, &record)? == UpdateStatus::NoRows {
                    store.insert(key, &record)?;
                }
            }
        } else if attr.is_set() {
            for record in encode_attr(def, attr)? {
                if store.update(key, &record)? == UpdateStatus::NoRows {
                    store.insert(key, &record)?;
                }
            }
        } else {
            let cleared = StoredAttr::new(def.name, "", AttrFlags::empty());
            delete_attr(store, key, &cleared)?;
        }
        attrs[index]
            .flags
            .remove(AttrFlags::MODIFY | AttrFlags::MODCACHE);
    }
    Ok(())
}

/// Deletes stored records that match no attribute definition and are not in `keep`.
fn delete_stale_unknown(
    store: &mut dyn AttrStore,
    key: &ObjectKey,
    defs: &AttrDefs,
    keep: &[StoredAttr],
) -> Result<()> {
    let mut stale = Vec::new();
    {
        let mut cursor = store.open_cursor(key)?;
        while let Some(stored) = cursor.next()? {
            if defs.find(&stored.name).is_none()
                && !keep
                    .iter()
                    .any(|r| r.name == stored.name && r.resource == stored.resource)
            {
                stale.push(stored);
            }
        }
        cursor.close();
    }
    for record in stale {
        store.delete(key, &record.name, record.resource())?;
    }
    Ok(())
}

/// Deletes the stored record matching `record`'s name and resource.
///
/// A plain record (no resource) of an attribute that was stored as several resource
/// records removes all of them.
pub fn delete_attr(
    store: &mut dyn AttrStore,
    key: &ObjectKey,
    record: &StoredAttr,
) -> Result<DeleteStatus> {
    if record.resource.is_some() {
        return store.delete(key, &record.name, record.resource());
    }
    let mut resources = Vec::new();
    {
        let mut cursor = store.open_cursor(key)?;
        while let Some(stored) = cursor.next()? {
            if stored.name == record.name {
                resources.push(stored.resource().to_string());
            }
        }
        cursor.close();
    }
    let mut status = DeleteStatus::NoRows;
    for resource in resources {
        if store.delete(key, &record.name, &resource)? == DeleteStatus::Deleted {
            status = DeleteStatus::Deleted;
        }
    }
    Ok(status)
}
