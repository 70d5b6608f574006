use std::time::Duration;

use attrdb::store::MemoryStore;
use attrdb::{AttrStore, ObjectKey, ObjectKind, StoredAttr};

use crate::ConnectionId;
use crate::server::comm::Comm;
use crate::server::core::{Core, SchedulerInfo};
use crate::server::job::Job;
use crate::server::preempt::order::parse_preempt_order;
use crate::server::preempt::{PreemptJobsRequest, PreemptReply};
use crate::server::request::{LocalRequest, Permissions, RequestError, process_local_request};

pub const TEST_CONNECTION: u32 = 1;

#[derive(Default)]
pub struct TestComm {
    pub local_requests: Vec<LocalRequest>,
    pub replies: Vec<(ConnectionId, PreemptReply)>,
    pub rejections: Vec<(ConnectionId, RequestError)>,

    /// Makes every issued local request fail.
    pub fail_issue: bool,
}

impl TestComm {
    pub fn take_local_requests(&mut self, len: usize) -> Vec<LocalRequest> {
        assert_eq!(self.local_requests.len(), len);
        std::mem::take(&mut self.local_requests)
    }

    pub fn take_replies(&mut self, len: usize) -> Vec<(ConnectionId, PreemptReply)> {
        assert_eq!(self.replies.len(), len);
        std::mem::take(&mut self.replies)
    }

    /// Takes the only reply and checks it went to the test scheduler.
    pub fn take_reply(&mut self) -> PreemptReply {
        let (connection, reply) = self.take_replies(1).pop().unwrap();
        assert_eq!(connection, ConnectionId::new(TEST_CONNECTION));
        reply
    }

    pub fn take_rejections(&mut self, len: usize) -> Vec<(ConnectionId, RequestError)> {
        assert_eq!(self.rejections.len(), len);
        std::mem::take(&mut self.rejections)
    }

    pub fn emptiness_check(&self) {
        if !self.local_requests.is_empty() {
            let ids: Vec<_> = self.local_requests.iter().map(|r| &r.job_id).collect();
            panic!("Unexpected local requests for jobs: {ids:?}");
        }
        assert!(self.replies.is_empty());
        assert!(self.rejections.is_empty());
    }
}

impl Comm for TestComm {
    fn issue_local_request(&mut self, request: LocalRequest) -> Result<(), RequestError> {
        if self.fail_issue {
            return Err(RequestError::System);
        }
        self.local_requests.push(request);
        Ok(())
    }

    fn send_preempt_reply(&mut self, connection: ConnectionId, reply: PreemptReply) {
        self.replies.push((connection, reply));
    }

    fn reject_request(&mut self, connection: ConnectionId, error: RequestError) {
        self.rejections.push((connection, error));
    }
}

pub fn create_test_comm() -> TestComm {
    TestComm::default()
}

pub fn create_test_core(order: &str) -> Core {
    create_test_core_with_store(order, MemoryStore::default())
}

pub fn create_test_core_with_store(order: &str, store: impl AttrStore + 'static) -> Core {
    let mut core = Core::new(Box::new(store), Duration::from_secs(60));
    core.register_scheduler(
        ConnectionId::new(TEST_CONNECTION),
        SchedulerInfo {
            name: "test".to_string(),
            orderings: parse_preempt_order(order).unwrap(),
        },
    );
    core
}

/// Adds the job and writes it to the store as a new object.
pub fn submit_job(core: &mut Core, job: Job) {
    let job_id = job.id.clone();
    core.add_job(job);
    core.save_job(&job_id, true).unwrap();
}

pub fn preempt_request(job_ids: &[&str]) -> PreemptJobsRequest {
    PreemptJobsRequest {
        connection: ConnectionId::new(TEST_CONNECTION),
        user: "scheduler".to_string(),
        host: "headnode".to_string(),
        permissions: Permissions::MANAGER,
        job_ids: job_ids.iter().map(|id| id.to_string()).collect(),
    }
}

/// Executes issued local requests until none is left, returning how many ran.
pub fn run_local_requests(core: &mut Core, comm: &mut TestComm) -> usize {
    let mut count = 0;
    while !comm.local_requests.is_empty() {
        for request in std::mem::take(&mut comm.local_requests) {
            process_local_request(core, comm, request);
            count += 1;
        }
    }
    count
}

pub fn stored_records(store: &dyn AttrStore, kind: ObjectKind, id: &str) -> Vec<StoredAttr> {
    let mut cursor = store.open_cursor(&ObjectKey::new(kind, id)).unwrap();
    let mut records = Vec::new();
    while let Some(record) = cursor.next().unwrap() {
        records.push(record);
    }
    records
}

/// Outcome tags of a reply, in request order.
pub fn reply_tags(reply: &PreemptReply) -> Vec<(&str, &str)> {
    reply
        .jobs
        .iter()
        .map(|job| (job.job_id.as_str(), job.outcome.tag()))
        .collect()
}
