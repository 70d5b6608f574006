use crate::Map;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind of a server object whose attributes are persisted.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ObjectKind {
    Server,
    Queue,
    Job,
    Node,
}

impl ObjectKind {
    /// Server and queue objects only accept resources that are known to the running server.
    #[inline]
    pub fn checks_resource_names(&self) -> bool {
        matches!(self, ObjectKind::Server | ObjectKind::Queue)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Server => "server",
            ObjectKind::Queue => "queue",
            ObjectKind::Job => "job",
            ObjectKind::Node => "node",
        }
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Type family of an attribute slot.
///
/// Encoding, decoding and set operations are implemented once per family in [`crate::codec`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum AttrKind {
    Long,
    Str,
    Bool,
    /// Bitmask of hold types (`u`, `o`, `s`, `p`).
    Hold,
    /// List of resources, stored as one record per resource.
    Resources,
    /// Entity limits, accumulated by repeated increments.
    Entity,
    /// Bucket for stored attributes that are no longer defined.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct AttrDef {
    pub name: &'static str,
    pub kind: AttrKind,
}

impl AttrDef {
    pub const fn new(name: &'static str, kind: AttrKind) -> Self {
        Self { name, kind }
    }
}

/// Ordered table of attribute definitions for one object kind.
#[derive(Debug, Clone)]
pub struct AttrDefs {
    object_kind: ObjectKind,
    defs: Vec<AttrDef>,
    index: Map<String, usize>,
    unknown: Option<usize>,
}

impl AttrDefs {
    pub fn new(object_kind: ObjectKind, defs: Vec<AttrDef>) -> Self {
        let index = defs
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.to_ascii_lowercase(), i))
            .collect();
        let unknown = defs.iter().position(|def| def.kind == AttrKind::Unknown);
        Self {
            object_kind,
            defs,
            index,
            unknown,
        }
    }

    #[inline]
    pub fn object_kind(&self) -> ObjectKind {
        self.object_kind
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> &AttrDef {
        &self.defs[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttrDef> {
        self.defs.iter()
    }

    /// Attribute names are matched case-insensitively.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_ascii_lowercase()).copied()
    }

    /// Slot that collects records whose name is not defined (jobs only).
    #[inline]
    pub fn unknown_slot(&self) -> Option<usize> {
        self.unknown
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResourceKind {
    Long,
    /// Duration in seconds, written as `HH:MM:SS`.
    Time,
    /// Size in bytes, written with a unit suffix (`kb`, `mb`, ...).
    Size,
    Str,
}

#[derive(Debug, Clone)]
pub struct ResourceDef {
    pub name: String,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone)]
pub struct ResourceDefs {
    defs: Map<String, ResourceDef>,
}

impl ResourceDefs {
    pub fn empty() -> Self {
        Self {
            defs: Default::default(),
        }
    }

    pub fn add(&mut self, name: &str, kind: ResourceKind) {
        self.defs.insert(
            name.to_ascii_lowercase(),
            ResourceDef {
                name: name.to_string(),
                kind,
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> Option<ResourceDef> {
        self.defs.remove(&name.to_ascii_lowercase())
    }

    pub fn find(&self, name: &str) -> Option<&ResourceDef> {
        self.defs.get(&name.to_ascii_lowercase())
    }
}

impl Default for ResourceDefs {
    fn default() -> Self {
        let mut defs = Self::empty();
        defs.add("ncpus", ResourceKind::Long);
        defs.add("nodect", ResourceKind::Long);
        defs.add("mem", ResourceKind::Size);
        defs.add("vmem", ResourceKind::Size);
        defs.add("walltime", ResourceKind::Time);
        defs.add("soft_walltime", ResourceKind::Time);
        defs.add("cput", ResourceKind::Time);
        defs.add("host", ResourceKind::Str);
        defs.add("arch", ResourceKind::Str);
        defs
    }
}
