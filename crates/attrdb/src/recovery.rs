use crate::attr::{AttrArray, AttrFlags, Attribute, BatchOp};
use crate::codec::{decode_attr, set_attr};
use crate::defs::{AttrDefs, AttrKind, ResourceDefs};
use crate::record::{ObjectKey, StoredAttr};
use crate::store::AttrStore;
use crate::Result;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ActionMode {
    /// The value was just restored from the store.
    Recover,
}

/// Per-attribute hooks of the owning object, invoked after a value is decoded.
pub trait AttrActions {
    fn on_attr_action(&mut self, index: usize, attr: &mut Attribute, mode: ActionMode)
    -> Result<()>;
}

pub struct NoActions;

impl AttrActions for NoActions {
    fn on_attr_action(&mut self, _: usize, _: &mut Attribute, _: ActionMode) -> Result<()> {
        Ok(())
    }
}

/// Rebuilds the attribute array of one object from its stored records.
///
/// All records are read before any slot is touched, so a failing cursor leaves `attrs`
/// unchanged. Records that cannot be decoded are logged and skipped.
pub fn recover_attrs(
    store: &dyn AttrStore,
    key: &ObjectKey,
    defs: &AttrDefs,
    attrs: &mut AttrArray,
    resources: &ResourceDefs,
    actions: &mut dyn AttrActions,
) -> Result<()> {
    let mut slots: Vec<Vec<StoredAttr>> = vec![Vec::new(); defs.len()];
    let check_resources = key.kind.checks_resource_names();

    let mut cursor = store.open_cursor(key)?;
    while let Some(record) = cursor.next()? {
        if record.name.is_empty() {
            log::warn!("Discarding record without a name in {key}");
            continue;
        }
        if check_resources
            && record.resource.is_some()
            && resources.find(record.resource()).is_none()
        {
            log::warn!(
                "Discarding unknown resource {}.{} of {key}",
                record.name,
                record.resource()
            );
            continue;
        }
        let Some(index) = defs.find(&record.name).or(defs.unknown_slot()) else {
            log::warn!("Discarding unknown attribute {} of {key}", record.name);
            continue;
        };
        slots[index].push(record);
    }
    cursor.close();

    attrs.reset(defs);
    for (index, records) in slots.into_iter().enumerate() {
        let Some(last) = records.last() else {
            continue;
        };
        let stored_flags = last.flags;
        let def = defs.get(index);
        for record in &records {
            let merge = def.kind == AttrKind::Entity && attrs[index].is_set();
            let result = if merge {
                let mut scratch = Attribute::new(def.kind);
                decode_attr(def, &mut scratch, record, resources)
                    .and_then(|_| set_attr(&mut attrs[index], &scratch, BatchOp::Incr))
            } else {
                decode_attr(def, &mut attrs[index], record, resources)
            };
            if let Err(error) = result {
                log::warn!("Cannot recover {record} of {key}: {error}");
                continue;
            }
            if merge {
                continue;
            }
            if let Err(error) = actions.on_attr_action(index, &mut attrs[index], ActionMode::Recover)
            {
                log::warn!("Recover action of {} failed for {key}: {error}", def.name);
            }
        }
        let attr = &mut attrs[index];
        if attr.is_set() {
            attr.flags = (stored_flags | AttrFlags::SET) - AttrFlags::MODIFY - AttrFlags::MODCACHE;
        }
    }
    Ok(())
}

/// Appends the undecoded records of one object to `out`.
pub fn recover_attrs_raw(
    store: &dyn AttrStore,
    key: &ObjectKey,
    out: &mut Vec<StoredAttr>,
) -> Result<()> {
    let mut cursor = store.open_cursor(key)?;
    let mut records = Vec::new();
    while let Some(record) = cursor.next()? {
        records.push(record);
    }
    cursor.close();
    out.extend(records);
    Ok(())
}
