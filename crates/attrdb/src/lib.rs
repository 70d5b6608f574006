pub mod attr;
pub mod codec;
pub mod common;
pub mod defs;
pub mod entity;
pub mod record;
pub mod recovery;
pub mod resource;
pub mod store;

pub use crate::attr::{AttrArray, AttrFlags, AttrValue, Attribute, BatchOp, HoldTypes};
pub use crate::common::{Map, Set};
pub use crate::defs::{AttrDef, AttrDefs, AttrKind, ObjectKind, ResourceDef, ResourceDefs};
pub use crate::record::{ObjectKey, StoredAttr};
pub use crate::recovery::{ActionMode, AttrActions, NoActions, recover_attrs, recover_attrs_raw};
pub use crate::store::{
    AttrCursor, AttrStore, DeleteStatus, UpdateStatus, delete_attr, save_attrs,
};

pub type Error = common::error::AttrError;
pub type Result<T> = std::result::Result<T, Error>;
