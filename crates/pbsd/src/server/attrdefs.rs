use std::sync::LazyLock;

use attrdb::resource::ResourceValue;
use attrdb::{ActionMode, AttrActions, AttrDef, AttrDefs, AttrKind, AttrValue, Attribute, ObjectKind};

/// Slots of the job attribute table.
pub mod job_attr {
    pub const NAME: usize = 0;
    pub const STATE: usize = 1;
    pub const QUEUE: usize = 2;
    pub const HOLD: usize = 3;
    pub const SCHED_PREEMPTED: usize = 4;
    pub const COMMENT: usize = 5;
    pub const CHECKPOINT: usize = 6;
    pub const RERUNABLE: usize = 7;
    pub const RESOURCE_LIST: usize = 8;
    pub const RESOURCES_USED: usize = 9;
    pub const UNKNOWN: usize = 10;
}

pub mod queue_attr {
    pub const QUEUE_TYPE: usize = 0;
    pub const ENABLED: usize = 1;
    pub const STARTED: usize = 2;
    pub const PRIORITY: usize = 3;
    pub const MAX_RUN: usize = 4;
    pub const MAX_RUN_RES: usize = 5;
    pub const RESOURCES_MAX: usize = 6;
    pub const RESOURCES_DEFAULT: usize = 7;
}

pub mod server_attr {
    pub const SCHEDULING: usize = 0;
    pub const DEFAULT_QUEUE: usize = 1;
    pub const COMMENT: usize = 2;
    pub const MAX_RUN: usize = 3;
    pub const MAX_RUN_RES: usize = 4;
    pub const RESOURCES_DEFAULT: usize = 5;
}

pub static JOB_ATTR_DEFS: LazyLock<AttrDefs> = LazyLock::new(|| {
    AttrDefs::new(
        ObjectKind::Job,
        vec![
            AttrDef::new("Job_Name", AttrKind::Str),
            AttrDef::new("job_state", AttrKind::Str),
            AttrDef::new("queue", AttrKind::Str),
            AttrDef::new("Hold_Types", AttrKind::Hold),
            AttrDef::new("sched_preempted", AttrKind::Long),
            AttrDef::new("comment", AttrKind::Str),
            AttrDef::new("Checkpoint", AttrKind::Str),
            AttrDef::new("Rerunable", AttrKind::Bool),
            AttrDef::new("Resource_List", AttrKind::Resources),
            AttrDef::new("resources_used", AttrKind::Resources),
            AttrDef::new("_other_", AttrKind::Unknown),
        ],
    )
});

pub static QUEUE_ATTR_DEFS: LazyLock<AttrDefs> = LazyLock::new(|| {
    AttrDefs::new(
        ObjectKind::Queue,
        vec![
            AttrDef::new("queue_type", AttrKind::Str),
            AttrDef::new("enabled", AttrKind::Bool),
            AttrDef::new("started", AttrKind::Bool),
            AttrDef::new("Priority", AttrKind::Long),
            AttrDef::new("max_run", AttrKind::Entity),
            AttrDef::new("max_run_res", AttrKind::Entity),
            AttrDef::new("resources_max", AttrKind::Resources),
            AttrDef::new("resources_default", AttrKind::Resources),
        ],
    )
});

pub static SERVER_ATTR_DEFS: LazyLock<AttrDefs> = LazyLock::new(|| {
    AttrDefs::new(
        ObjectKind::Server,
        vec![
            AttrDef::new("scheduling", AttrKind::Bool),
            AttrDef::new("default_queue", AttrKind::Str),
            AttrDef::new("comment", AttrKind::Str),
            AttrDef::new("max_run", AttrKind::Entity),
            AttrDef::new("max_run_res", AttrKind::Entity),
            AttrDef::new("resources_default", AttrKind::Resources),
        ],
    )
});

/// Recovery hooks of job attributes.
pub struct JobAttrActions;

impl AttrActions for JobAttrActions {
    fn on_attr_action(
        &mut self,
        index: usize,
        attr: &mut Attribute,
        _mode: ActionMode,
    ) -> attrdb::Result<()> {
        if index != job_attr::RESOURCE_LIST {
            return Ok(());
        }
        let AttrValue::Resources(resources) = &mut attr.value else {
            return Ok(());
        };
        let soft = resources.get("soft_walltime").and_then(ResourceValue::as_seconds);
        let hard = resources.get("walltime").and_then(ResourceValue::as_seconds);
        if let (Some(soft), Some(hard)) = (soft, hard) {
            if soft > hard {
                log::warn!("Dropping soft_walltime {soft}s that exceeds walltime {hard}s");
                resources.remove("soft_walltime");
            }
        }
        Ok(())
    }
}

/// Recovery hooks of queue attributes.
pub struct QueueAttrActions;

impl AttrActions for QueueAttrActions {
    fn on_attr_action(
        &mut self,
        index: usize,
        attr: &mut Attribute,
        _mode: ActionMode,
    ) -> attrdb::Result<()> {
        if index != queue_attr::QUEUE_TYPE {
            return Ok(());
        }
        if let AttrValue::Str(value) = &mut attr.value {
            let normalized = match value.to_ascii_lowercase().as_str() {
                "e" | "execution" => "Execution",
                "r" | "route" => "Route",
                _ => return Err(attrdb::Error::GenericError(format!("bad queue_type {value}"))),
            };
            *value = normalized.to_string();
        }
        Ok(())
    }
}
