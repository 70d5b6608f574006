use std::time::Duration;

use attrdb::store::MemoryStore;
use attrdb::{AttrArray, AttrStore, ObjectKey, ObjectKind, ResourceDefs, StoredAttr, save_attrs};

use crate::common::WrappedRcRefCell;
use crate::common::config::default_preempt_timeout;
use crate::common::index::IdCounter;
use crate::server::attrdefs::{JOB_ATTR_DEFS, SERVER_ATTR_DEFS};
use crate::server::job::Job;
use crate::server::preempt::PreemptBatch;
use crate::server::preempt::order::PreemptOrdering;
use crate::server::queue::Queue;
use crate::{ConnectionId, Map, PreemptBatchId};

/// Identifier of the single server object in the store.
pub const SERVER_OBJECT_ID: &str = "server";

#[derive(Debug)]
pub struct SchedulerInfo {
    pub name: String,
    pub orderings: Vec<PreemptOrdering>,
}

pub struct Core {
    jobs: Map<String, Job>,
    queues: Map<String, Queue>,
    server_attrs: AttrArray,
    nodes: Map<String, Vec<StoredAttr>>,
    schedulers: Map<ConnectionId, SchedulerInfo>,

    preempt_batches: Map<PreemptBatchId, PreemptBatch>,
    batch_id_counter: IdCounter,
    preempt_timeout: Duration,

    resources: ResourceDefs,
    store: Box<dyn AttrStore>,
}

pub type CoreRef = WrappedRcRefCell<Core>;

impl Default for Core {
    fn default() -> Self {
        Core::new(Box::new(MemoryStore::default()), default_preempt_timeout())
    }
}

impl Core {
    pub fn new(store: Box<dyn AttrStore>, preempt_timeout: Duration) -> Self {
        Core {
            jobs: Default::default(),
            queues: Default::default(),
            server_attrs: AttrArray::new(&SERVER_ATTR_DEFS),
            nodes: Default::default(),
            schedulers: Default::default(),
            preempt_batches: Default::default(),
            batch_id_counter: Default::default(),
            preempt_timeout,
            resources: ResourceDefs::default(),
            store,
        }
    }

    pub fn add_job(&mut self, job: Job) {
        let job_id = job.id.clone();
        if self.jobs.insert(job_id.clone(), job).is_some() {
            log::warn!("Job {job_id} replaced an existing job");
        }
    }

    #[inline]
    pub fn get_job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    #[inline]
    pub fn get_job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn add_queue(&mut self, queue: Queue) {
        self.queues.insert(queue.name.clone(), queue);
    }

    pub fn get_queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    pub fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    pub fn server_attrs(&self) -> &AttrArray {
        &self.server_attrs
    }

    pub fn set_server_attrs(&mut self, attrs: AttrArray) {
        self.server_attrs = attrs;
    }

    pub fn set_node(&mut self, name: String, records: Vec<StoredAttr>) {
        self.nodes.insert(name, records);
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&String, &Vec<StoredAttr>)> {
        self.nodes.iter()
    }

    pub fn register_scheduler(&mut self, connection: ConnectionId, info: SchedulerInfo) {
        log::debug!(
            "Scheduler {} registered on connection {connection}",
            info.name
        );
        self.schedulers.insert(connection, info);
    }

    #[inline]
    pub fn get_scheduler(&self, connection: ConnectionId) -> Option<&SchedulerInfo> {
        self.schedulers.get(&connection)
    }

    pub fn new_batch_id(&mut self) -> PreemptBatchId {
        self.batch_id_counter.next()
    }

    pub fn insert_batch(&mut self, batch_id: PreemptBatchId, batch: PreemptBatch) {
        assert!(self.preempt_batches.insert(batch_id, batch).is_none());
    }

    #[inline]
    pub fn get_batch(&self, batch_id: PreemptBatchId) -> Option<&PreemptBatch> {
        self.preempt_batches.get(&batch_id)
    }

    #[inline]
    pub fn get_batch_mut(&mut self, batch_id: PreemptBatchId) -> Option<&mut PreemptBatch> {
        self.preempt_batches.get_mut(&batch_id)
    }

    pub fn remove_batch(&mut self, batch_id: PreemptBatchId) -> Option<PreemptBatch> {
        self.preempt_batches.remove(&batch_id)
    }

    pub fn batch_count(&self) -> usize {
        self.preempt_batches.len()
    }

    #[inline]
    pub fn preempt_timeout(&self) -> Duration {
        self.preempt_timeout
    }

    #[inline]
    pub fn resources(&self) -> &ResourceDefs {
        &self.resources
    }

    #[inline]
    pub fn store(&self) -> &dyn AttrStore {
        self.store.as_ref()
    }

    pub fn into_store(self) -> Box<dyn AttrStore> {
        self.store
    }

    /// Persists the modified attributes of a job.
    pub fn save_job(&mut self, job_id: &str, is_new: bool) -> crate::Result<()> {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return crate::common::error::error(format!("job {job_id} not found"));
        };
        let key = ObjectKey::new(ObjectKind::Job, job_id);
        save_attrs(
            self.store.as_mut(),
            &key,
            &JOB_ATTR_DEFS,
            &mut job.attrs,
            is_new,
        )?;
        Ok(())
    }

    /// Removes a job from the table and drops its stored records.
    pub fn purge_job(&mut self, job_id: &str) -> crate::Result<Option<Job>> {
        let job = self.jobs.remove(job_id);
        self.store
            .delete_object(&ObjectKey::new(ObjectKind::Job, job_id))?;
        log::debug!("Job {job_id} purged");
        Ok(job)
    }
}
