use attrdb::codec::decode_attr;
use attrdb::{AttrFlags, AttrValue, HoldTypes, ResourceDefs, StoredAttr};

use crate::server::attrdefs::{JOB_ATTR_DEFS, job_attr};
use crate::server::job::{Job, JobState};

pub struct JobBuilder {
    id: String,
    state: JobState,
    hold: HoldTypes,
    requested: Vec<(String, String)>,
    used: Vec<(String, String)>,
    checkpoint: Option<String>,
    rerunable: Option<bool>,
}

impl JobBuilder {
    pub fn new(id: &str) -> JobBuilder {
        JobBuilder {
            id: id.to_string(),
            state: JobState::Running,
            hold: HoldTypes::empty(),
            requested: vec![],
            used: vec![],
            checkpoint: None,
            rerunable: None,
        }
    }

    pub fn state(mut self, state: JobState) -> JobBuilder {
        self.state = state;
        self
    }

    pub fn hold(mut self, hold: HoldTypes) -> JobBuilder {
        self.hold = hold;
        self
    }

    pub fn requested(mut self, resource: &str, value: &str) -> JobBuilder {
        self.requested.push((resource.to_string(), value.to_string()));
        self
    }

    pub fn used(mut self, resource: &str, value: &str) -> JobBuilder {
        self.used.push((resource.to_string(), value.to_string()));
        self
    }

    pub fn checkpoint(mut self, value: &str) -> JobBuilder {
        self.checkpoint = Some(value.to_string());
        self
    }

    pub fn rerunable(mut self, value: bool) -> JobBuilder {
        self.rerunable = Some(value);
        self
    }

    pub fn build(self) -> Job {
        let mut job = Job::new(self.id, self.state);
        let resources = ResourceDefs::default();
        for (index, values) in [
            (job_attr::RESOURCE_LIST, &self.requested),
            (job_attr::RESOURCES_USED, &self.used),
        ] {
            let def = JOB_ATTR_DEFS.get(index);
            for (resource, value) in values {
                let record =
                    StoredAttr::with_resource(def.name, resource, value, AttrFlags::empty());
                decode_attr(def, &mut job.attrs[index], &record, &resources).unwrap();
            }
        }
        if !self.hold.is_empty() {
            let attr = &mut job.attrs[job_attr::HOLD];
            attr.value = AttrValue::Hold(self.hold);
            attr.mark_modified();
        }
        if let Some(value) = self.checkpoint {
            job.attrs[job_attr::CHECKPOINT].set_str(value);
        }
        if let Some(value) = self.rerunable {
            job.attrs[job_attr::RERUNABLE].set_bool(value);
        }
        job
    }
}
