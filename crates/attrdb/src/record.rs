use crate::attr::AttrFlags;
use crate::defs::ObjectKind;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifies the stored attributes of one object.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub id: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Flat name/resource/value unit exchanged between the codec and the store.
///
/// A record without a resource is a plain attribute, a record with a resource is one
/// sub-keyed entry of the named parent attribute (e.g. `Resource_List.ncpus`).
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoredAttr {
    pub name: String,
    pub resource: Option<String>,
    pub value: String,
    pub flags: AttrFlags,
}

impl StoredAttr {
    pub fn new(name: impl Into<String>, value: impl Into<String>, flags: AttrFlags) -> Self {
        Self {
            name: name.into(),
            resource: None,
            value: value.into(),
            flags,
        }
    }

    pub fn with_resource(
        name: impl Into<String>,
        resource: impl Into<String>,
        value: impl Into<String>,
        flags: AttrFlags,
    ) -> Self {
        let resource = resource.into();
        Self {
            name: name.into(),
            resource: (!resource.is_empty()).then_some(resource),
            value: value.into(),
            flags,
        }
    }

    /// Resource qualifier, empty for plain attributes.
    #[inline]
    pub fn resource(&self) -> &str {
        self.resource.as_deref().unwrap_or("")
    }

    /// Records are keyed by name and resource inside one object.
    #[inline]
    pub fn same_key(&self, name: &str, resource: &str) -> bool {
        self.name == name && self.resource() == resource
    }
}

impl Display for StoredAttr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}.{}={}", self.name, resource, self.value),
            None => write!(f, "{}={}", self.name, self.value),
        }
    }
}
