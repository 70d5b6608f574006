pub mod order;
pub mod reactor;

use std::fmt::{Display, Formatter};
use std::time::Instant;

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::server::request::Permissions;
use crate::{ConnectionId, PreemptBatchId};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PreemptMethod {
    Suspend,
    Checkpoint,
    Requeue,
    Delete,
}

impl PreemptMethod {
    pub fn letter(&self) -> char {
        match self {
            PreemptMethod::Suspend => 'S',
            PreemptMethod::Checkpoint => 'C',
            PreemptMethod::Requeue => 'R',
            PreemptMethod::Delete => 'D',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'S' => Some(PreemptMethod::Suspend),
            'C' => Some(PreemptMethod::Checkpoint),
            'R' => Some(PreemptMethod::Requeue),
            'D' => Some(PreemptMethod::Delete),
            _ => None,
        }
    }
}

impl Display for PreemptMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PreemptMethod::Suspend => "suspend",
            PreemptMethod::Checkpoint => "checkpoint",
            PreemptMethod::Requeue => "requeue",
            PreemptMethod::Delete => "delete",
        };
        f.write_str(name)
    }
}

pub type PreemptMethods = SmallVec<[PreemptMethod; 4]>;

/// Final result of preempting one job, reported to the scheduler as a short tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PreemptOutcome {
    Suspended,
    Checkpointed,
    Requeued,
    Deleted,
    AlreadyQueued,
    AlreadyGone,
    Failed,
}

impl PreemptOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            PreemptOutcome::Suspended => "S",
            PreemptOutcome::Checkpointed => "C",
            PreemptOutcome::Requeued | PreemptOutcome::AlreadyQueued => "Q",
            PreemptOutcome::Deleted | PreemptOutcome::AlreadyGone => "D",
            PreemptOutcome::Failed => "000",
        }
    }
}

impl From<PreemptMethod> for PreemptOutcome {
    fn from(method: PreemptMethod) -> Self {
        match method {
            PreemptMethod::Suspend => PreemptOutcome::Suspended,
            PreemptMethod::Checkpoint => PreemptOutcome::Checkpointed,
            PreemptMethod::Requeue => PreemptOutcome::Requeued,
            PreemptMethod::Delete => PreemptOutcome::Deleted,
        }
    }
}

impl Serialize for PreemptOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

/// Preempt-Jobs request of a scheduler.
#[derive(Debug, Clone)]
pub struct PreemptJobsRequest {
    pub connection: ConnectionId,
    pub user: String,
    pub host: String,
    pub permissions: Permissions,
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PreemptJobReply {
    pub job_id: String,
    pub outcome: PreemptOutcome,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PreemptReply {
    /// 1 when at least one job could not be preempted.
    pub code: i32,
    pub jobs: Vec<PreemptJobReply>,
}

/// Outstanding Preempt-Jobs request.
///
/// Outcomes are stored by the position of the job in the request; the reply is complete
/// once every position has one.
#[derive(Debug)]
pub struct PreemptBatch {
    pub connection: ConnectionId,
    pub user: String,
    pub host: String,
    pub permissions: Permissions,
    job_ids: Vec<String>,
    outcomes: Vec<Option<PreemptOutcome>>,
    resolved: usize,
}

impl PreemptBatch {
    pub fn new(request: &PreemptJobsRequest) -> Self {
        PreemptBatch {
            connection: request.connection,
            user: request.user.clone(),
            host: request.host.clone(),
            permissions: request.permissions,
            job_ids: request.job_ids.clone(),
            outcomes: vec![None; request.job_ids.len()],
            resolved: 0,
        }
    }

    /// Returns false when the slot already had an outcome.
    pub fn record(&mut self, slot: usize, outcome: PreemptOutcome) -> bool {
        match self.outcomes.get_mut(slot) {
            Some(entry @ None) => {
                *entry = Some(outcome);
                self.resolved += 1;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.resolved == self.outcomes.len()
    }

    #[inline]
    pub fn resolved(&self) -> usize {
        self.resolved
    }

    pub fn into_reply(self) -> PreemptReply {
        let jobs: Vec<_> = self
            .job_ids
            .into_iter()
            .zip(self.outcomes)
            .map(|(job_id, outcome)| PreemptJobReply {
                job_id,
                outcome: outcome.unwrap_or(PreemptOutcome::Failed),
            })
            .collect();
        let code = jobs
            .iter()
            .any(|job| job.outcome == PreemptOutcome::Failed) as i32;
        PreemptReply { code, jobs }
    }
}

/// Identifies the method attempt a completion belongs to.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PreemptContinuation {
    pub job_id: String,
    pub method: PreemptMethod,
    pub attempt: u32,
}

/// Preemption progress of one job.
#[derive(Debug)]
pub struct JobPreemption {
    pub batch_id: PreemptBatchId,
    pub slot: usize,
    pub methods: PreemptMethods,
    pub cursor: usize,
    pub attempt: u32,
    pub deadline: Option<Instant>,
}

impl JobPreemption {
    pub fn new(batch_id: PreemptBatchId, slot: usize, methods: PreemptMethods) -> Self {
        JobPreemption {
            batch_id,
            slot,
            methods,
            cursor: 0,
            attempt: 0,
            deadline: None,
        }
    }

    /// `None` once every method was tried.
    #[inline]
    pub fn current_method(&self) -> Option<PreemptMethod> {
        self.methods.get(self.cursor).copied()
    }
}
