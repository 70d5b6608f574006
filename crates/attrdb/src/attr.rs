use crate::defs::{AttrDefs, AttrKind};
use crate::entity::EntityLimits;
use crate::record::StoredAttr;
use crate::resource::ResourceList;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

bitflags! {
    #[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
    pub struct AttrFlags: u32 {
        /// The attribute has a value.
        const SET = 0x01;
        /// The value changed since the last save.
        const MODIFY = 0x02;
        /// The value is a server default.
        const DEFAULT = 0x04;
        /// The value changed since the last status cache refresh.
        const MODCACHE = 0x08;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
    pub struct HoldTypes: u32 {
        const USER = 0x01;
        const OTHER = 0x02;
        const SYSTEM = 0x04;
        const BAD_PASSWORD = 0x08;
    }
}

const HOLD_LETTERS: [(char, HoldTypes); 4] = [
    ('u', HoldTypes::USER),
    ('o', HoldTypes::OTHER),
    ('s', HoldTypes::SYSTEM),
    ('p', HoldTypes::BAD_PASSWORD),
];

impl HoldTypes {
    /// Parses hold letters (`"us"`); `"n"` means no hold.
    pub fn parse(value: &str) -> Result<Self, String> {
        let mut holds = HoldTypes::empty();
        for c in value.trim().chars() {
            if c == 'n' {
                continue;
            }
            let (_, hold) = HOLD_LETTERS
                .iter()
                .find(|(letter, _)| *letter == c)
                .ok_or_else(|| format!("invalid hold type '{c}'"))?;
            holds |= *hold;
        }
        Ok(holds)
    }

    pub fn letters(&self) -> String {
        if self.is_empty() {
            return "n".to_string();
        }
        HOLD_LETTERS
            .iter()
            .filter(|(_, hold)| self.contains(*hold))
            .map(|(letter, _)| *letter)
            .collect()
    }
}

/// Operation used when one attribute value is applied onto another.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BatchOp {
    Set,
    Incr,
    Decr,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Long(i64),
    Str(String),
    Bool(bool),
    Hold(HoldTypes),
    Resources(ResourceList),
    Entity(EntityLimits),
    Unknown(Vec<StoredAttr>),
}

impl AttrValue {
    pub fn empty(kind: AttrKind) -> Self {
        match kind {
            AttrKind::Long => AttrValue::Long(0),
            AttrKind::Str => AttrValue::Str(String::new()),
            AttrKind::Bool => AttrValue::Bool(false),
            AttrKind::Hold => AttrValue::Hold(HoldTypes::empty()),
            AttrKind::Resources => AttrValue::Resources(Default::default()),
            AttrKind::Entity => AttrValue::Entity(Default::default()),
            AttrKind::Unknown => AttrValue::Unknown(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub flags: AttrFlags,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new(kind: AttrKind) -> Self {
        Self {
            flags: AttrFlags::empty(),
            value: AttrValue::empty(kind),
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flags.contains(AttrFlags::SET)
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        self.flags.intersects(AttrFlags::MODIFY | AttrFlags::MODCACHE)
    }

    #[inline]
    pub fn mark_modified(&mut self) {
        self.flags |= AttrFlags::SET | AttrFlags::MODIFY | AttrFlags::MODCACHE;
    }

    /// Drops the value; the attribute still has to be saved so the store forgets it.
    pub fn clear(&mut self) {
        let was_set = self.is_set();
        self.value = match &self.value {
            AttrValue::Long(_) => AttrValue::Long(0),
            AttrValue::Str(_) => AttrValue::Str(String::new()),
            AttrValue::Bool(_) => AttrValue::Bool(false),
            AttrValue::Hold(_) => AttrValue::Hold(HoldTypes::empty()),
            AttrValue::Resources(_) => AttrValue::Resources(Default::default()),
            AttrValue::Entity(_) => AttrValue::Entity(Default::default()),
            AttrValue::Unknown(_) => AttrValue::Unknown(Vec::new()),
        };
        self.flags = AttrFlags::empty();
        if was_set {
            self.flags |= AttrFlags::MODIFY | AttrFlags::MODCACHE;
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match (&self.value, self.is_set()) {
            (AttrValue::Long(v), true) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match (&self.value, self.is_set()) {
            (AttrValue::Str(v), true) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match (&self.value, self.is_set()) {
            (AttrValue::Bool(v), true) => Some(*v),
            _ => None,
        }
    }

    /// Unset hold attributes read as "no hold".
    pub fn as_hold(&self) -> HoldTypes {
        match (&self.value, self.is_set()) {
            (AttrValue::Hold(v), true) => *v,
            _ => HoldTypes::empty(),
        }
    }

    pub fn as_resources(&self) -> Option<&ResourceList> {
        match (&self.value, self.is_set()) {
            (AttrValue::Resources(v), true) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityLimits> {
        match (&self.value, self.is_set()) {
            (AttrValue::Entity(v), true) => Some(v),
            _ => None,
        }
    }

    pub fn as_unknown(&self) -> &[StoredAttr] {
        match &self.value {
            AttrValue::Unknown(v) => v,
            _ => &[],
        }
    }

    pub fn set_long(&mut self, value: i64) {
        self.value = AttrValue::Long(value);
        self.mark_modified();
    }

    pub fn set_str(&mut self, value: impl Into<String>) {
        self.value = AttrValue::Str(value.into());
        self.mark_modified();
    }

    pub fn set_bool(&mut self, value: bool) {
        self.value = AttrValue::Bool(value);
        self.mark_modified();
    }
}

/// Attribute array of one object, laid out by its [`AttrDefs`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttrArray(Vec<Attribute>);

impl AttrArray {
    pub fn new(defs: &AttrDefs) -> Self {
        Self(defs.iter().map(|def| Attribute::new(def.kind)).collect())
    }

    /// Puts every slot back into its unset state.
    pub fn reset(&mut self, defs: &AttrDefs) {
        *self = Self::new(defs);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Attribute> {
        self.0.iter_mut()
    }

    pub fn is_modified(&self) -> bool {
        self.0.iter().any(|a| a.is_modified())
    }
}

impl Index<usize> for AttrArray {
    type Output = Attribute;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for AttrArray {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_letters() {
        assert_eq!(HoldTypes::parse("n").unwrap(), HoldTypes::empty());
        assert_eq!(
            HoldTypes::parse("su").unwrap(),
            HoldTypes::USER | HoldTypes::SYSTEM
        );
        assert_eq!((HoldTypes::USER | HoldTypes::SYSTEM).letters(), "us");
        assert_eq!(HoldTypes::empty().letters(), "n");
        assert!(HoldTypes::parse("x").is_err());
    }

    #[test]
    fn clear_keeps_modify_only_when_set() {
        let mut attr = Attribute::new(AttrKind::Str);
        attr.clear();
        assert!(attr.flags.is_empty());

        attr.set_str("hello");
        assert!(attr.is_set() && attr.is_modified());
        attr.clear();
        assert!(!attr.is_set());
        assert!(attr.flags.contains(AttrFlags::MODIFY));
        assert_eq!(attr.as_str(), None);
    }
}
