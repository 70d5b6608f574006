//! Encode/decode/set operations, implemented once per attribute type family.

use crate::attr::{AttrFlags, AttrValue, Attribute, BatchOp, HoldTypes};
use crate::defs::{AttrDef, ResourceDefs, ResourceKind};
use crate::entity::EntityLimits;
use crate::record::StoredAttr;
use crate::resource::ResourceValue;
use crate::{Error, Result};

/// Encodes one attribute into zero or more stored records.
///
/// Unset attributes produce no records. Resource lists produce one record per resource and
/// entity limits one record per resource key.
pub fn encode_attr(def: &AttrDef, attr: &Attribute) -> Result<Vec<StoredAttr>> {
    if !attr.is_set() {
        return Ok(Vec::new());
    }
    let flags = attr.flags;
    let records = match &attr.value {
        AttrValue::Long(value) => vec![StoredAttr::new(def.name, value.to_string(), flags)],
        AttrValue::Str(value) => {
            if value.contains('\0') {
                return Err(Error::EncodeError {
                    attr: def.name.to_string(),
                    reason: "value contains a NUL character".to_string(),
                });
            }
            vec![StoredAttr::new(def.name, value.clone(), flags)]
        }
        AttrValue::Bool(value) => vec![StoredAttr::new(
            def.name,
            if *value { "True" } else { "False" },
            flags,
        )],
        AttrValue::Hold(value) => vec![StoredAttr::new(def.name, value.letters(), flags)],
        AttrValue::Resources(resources) => resources
            .iter()
            .map(|(name, value)| StoredAttr::with_resource(def.name, name, value.to_string(), flags))
            .collect(),
        AttrValue::Entity(limits) => limits
            .format_by_resource()
            .into_iter()
            .map(|(resource, value)| StoredAttr::with_resource(def.name, resource, value, flags))
            .collect(),
        AttrValue::Unknown(records) => records.clone(),
    };
    Ok(records)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "y" | "yes" | "1" => Some(true),
        "false" | "f" | "n" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Decodes one stored record into `attr`.
///
/// Resource lists accumulate: every decoded record adds one resource to the list. Other
/// families replace the value. An empty value unsets scalar attributes; inside a resource list
/// it is a valid string resource.
pub fn decode_attr(
    def: &AttrDef,
    attr: &mut Attribute,
    record: &StoredAttr,
    resources: &ResourceDefs,
) -> Result<()> {
    let value = record.value.as_str();
    let error = |reason: String| Error::decode(def.name, value, reason);

    if value.is_empty()
        && !matches!(
            attr.value,
            AttrValue::Str(_) | AttrValue::Resources(_) | AttrValue::Unknown(_)
        )
    {
        attr.clear();
        return Ok(());
    }

    match &mut attr.value {
        AttrValue::Long(target) => {
            *target = value.trim().parse::<i64>().map_err(|e| error(e.to_string()))?;
        }
        AttrValue::Str(target) => {
            *target = value.to_string();
        }
        AttrValue::Bool(target) => {
            *target = parse_bool(value).ok_or_else(|| error("not a boolean".to_string()))?;
        }
        AttrValue::Hold(target) => {
            *target = HoldTypes::parse(value).map_err(error)?;
        }
        AttrValue::Resources(target) => {
            let name = record
                .resource
                .as_deref()
                .ok_or_else(|| error("resource name is missing".to_string()))?;
            // Resources unknown to this server are kept verbatim as strings
            let (name, kind) = match resources.find(name) {
                Some(rdef) => (rdef.name.as_str(), rdef.kind),
                None => (name, ResourceKind::Str),
            };
            let parsed = ResourceValue::parse(kind, value).map_err(error)?;
            target.insert(name.to_string(), parsed);
        }
        AttrValue::Entity(target) => {
            *target = EntityLimits::parse(record.resource(), value).map_err(error)?;
        }
        AttrValue::Unknown(target) => {
            target.push(record.clone());
        }
    }
    attr.flags |= AttrFlags::SET | AttrFlags::MODIFY;
    Ok(())
}

/// Applies `src` onto `dest`.
///
/// `Incr` adds (numbers), appends (strings, unknown records), sets bits (holds, booleans) or
/// merges entries (resources, entity limits). `Decr` is the inverse; hold bits and entity
/// entries that are not present are ignored.
pub fn set_attr(dest: &mut Attribute, src: &Attribute, op: BatchOp) -> Result<()> {
    match (&mut dest.value, &src.value) {
        (AttrValue::Long(d), AttrValue::Long(s)) => match op {
            BatchOp::Set => *d = *s,
            BatchOp::Incr => *d += s,
            BatchOp::Decr => *d -= s,
        },
        (AttrValue::Str(d), AttrValue::Str(s)) => match op {
            BatchOp::Set => *d = s.clone(),
            BatchOp::Incr => d.push_str(s),
            BatchOp::Decr => {
                if let Some(stripped) = d.strip_suffix(s.as_str()) {
                    *d = stripped.to_string();
                }
            }
        },
        (AttrValue::Bool(d), AttrValue::Bool(s)) => match op {
            BatchOp::Set => *d = *s,
            BatchOp::Incr => *d |= s,
            BatchOp::Decr => *d &= !s,
        },
        (AttrValue::Hold(d), AttrValue::Hold(s)) => match op {
            BatchOp::Set => *d = *s,
            BatchOp::Incr => d.insert(*s),
            BatchOp::Decr => d.remove(*s),
        },
        (AttrValue::Resources(d), AttrValue::Resources(s)) => {
            for (name, value) in s {
                match (op, d.get_mut(name)) {
                    (BatchOp::Set, _) | (BatchOp::Incr, None) => {
                        d.insert(name.clone(), value.clone());
                    }
                    (BatchOp::Incr, Some(current)) => current.increment(value),
                    (BatchOp::Decr, Some(current)) => current.decrement(value),
                    (BatchOp::Decr, None) => {}
                }
            }
        }
        (AttrValue::Entity(d), AttrValue::Entity(s)) => match op {
            BatchOp::Set => *d = s.clone(),
            BatchOp::Incr => d.merge(s),
            BatchOp::Decr => d.remove_all(s),
        },
        (AttrValue::Unknown(d), AttrValue::Unknown(s)) => match op {
            BatchOp::Set => *d = s.clone(),
            BatchOp::Incr => d.extend(s.iter().cloned()),
            BatchOp::Decr => d.retain(|r| !s.contains(r)),
        },
        _ => {
            return Err(Error::GenericError(
                "cannot combine attributes of different types".to_string(),
            ));
        }
    }
    dest.mark_modified();
    Ok(())
}
