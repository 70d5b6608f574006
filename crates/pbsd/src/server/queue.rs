use attrdb::AttrArray;

use crate::server::attrdefs::{QUEUE_ATTR_DEFS, queue_attr};

#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub attrs: AttrArray,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Queue {
            name: name.into(),
            attrs: AttrArray::new(&QUEUE_ATTR_DEFS),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.attrs[queue_attr::ENABLED].as_bool().unwrap_or(false)
    }
}
