use attrdb::codec::set_attr;
use attrdb::{AttrKind, AttrValue, Attribute, BatchOp, HoldTypes};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::attrdefs::job_attr;
use crate::server::comm::Comm;
use crate::server::core::Core;
use crate::server::job::JobState;
use crate::server::preempt::PreemptContinuation;
use crate::server::preempt::reactor::{is_preempt_request_current, on_preempt_method_finished};

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
    pub struct Permissions: u32 {
        const USER = 0x01;
        const OPERATOR = 0x02;
        const MANAGER = 0x04;
    }
}

/// Batch request errors, with the numeric codes used in server logs.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestError {
    #[error("Internal server error")]
    Internal,
    #[error("System error")]
    System,
    #[error("Unknown job id")]
    UnknownJob,
    #[error("Request invalid for state of job")]
    BadState,
    #[error("Unauthorized request")]
    PermissionDenied,
    #[error("Feature or function not supported")]
    NoSupport,
    #[error("Job is not rerunnable")]
    NoRerun,
    #[error("Request timed out")]
    Timeout,
}

impl RequestError {
    pub fn code(&self) -> u32 {
        match self {
            RequestError::UnknownJob => 15001,
            RequestError::PermissionDenied => 15007,
            RequestError::System | RequestError::Timeout => 15010,
            RequestError::Internal => 15011,
            RequestError::NoSupport => 15017,
            RequestError::BadState => 15018,
            RequestError::NoRerun => 15071,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JobSignal {
    Suspend,
    Resume,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LocalRequestKind {
    SignalJob(JobSignal),
    /// Adds the hold; a system hold on a running job also checkpoints it.
    HoldJob { hold: HoldTypes },
    Rerun,
    DeleteJob,
}

/// Request the server issues to itself.
#[derive(Debug, Clone)]
pub struct LocalRequest {
    pub job_id: String,
    pub kind: LocalRequestKind,
    pub user: String,
    pub host: String,
    pub permissions: Permissions,
    pub continuation: Option<PreemptContinuation>,
}

fn persist(core: &mut Core, job_id: &str) -> Result<(), RequestError> {
    core.save_job(job_id, false).map_err(|error| {
        log::error!("Cannot save job {job_id}: {error}");
        RequestError::System
    })
}

/// Executes a local request against the job table.
pub fn handle_local_request(core: &mut Core, request: &LocalRequest) -> Result<(), RequestError> {
    if !request
        .permissions
        .intersects(Permissions::OPERATOR | Permissions::MANAGER)
    {
        log::debug!(
            "Request {:?} of {}@{} rejected, permissions {:?}",
            request.kind,
            request.user,
            request.host,
            request.permissions
        );
        return Err(RequestError::PermissionDenied);
    }
    let job_id = request.job_id.as_str();
    let job = core.get_job_mut(job_id).ok_or(RequestError::UnknownJob)?;

    match &request.kind {
        LocalRequestKind::SignalJob(JobSignal::Suspend) => {
            if !job.is_running() {
                return Err(RequestError::BadState);
            }
            job.set_state(JobState::Suspended);
            persist(core, job_id)
        }
        LocalRequestKind::SignalJob(JobSignal::Resume) => {
            if job.state() != JobState::Suspended {
                return Err(RequestError::BadState);
            }
            job.set_state(JobState::Running);
            persist(core, job_id)
        }
        LocalRequestKind::HoldJob { hold } => {
            let mut value = Attribute::new(AttrKind::Hold);
            value.value = AttrValue::Hold(*hold);
            set_attr(&mut job.attrs[job_attr::HOLD], &value, BatchOp::Incr)
                .map_err(|_| RequestError::Internal)?;
            if !job.is_running() {
                job.evaluate_hold_state();
                return persist(core, job_id);
            }
            if !hold.contains(HoldTypes::SYSTEM) {
                return persist(core, job_id);
            }
            if !job.can_checkpoint() {
                // The hold stays set, the caller is responsible for releasing it
                persist(core, job_id)?;
                return Err(RequestError::NoSupport);
            }
            job.set_state(JobState::Held);
            job.attrs[job_attr::RESOURCES_USED].clear();
            persist(core, job_id)
        }
        LocalRequestKind::Rerun => {
            if !matches!(job.state(), JobState::Running | JobState::Suspended) {
                return Err(RequestError::BadState);
            }
            if !job.is_rerunable() {
                return Err(RequestError::NoRerun);
            }
            job.set_state(JobState::Queued);
            job.attrs[job_attr::RESOURCES_USED].clear();
            job.evaluate_hold_state();
            persist(core, job_id)
        }
        LocalRequestKind::DeleteJob => {
            if job.state().is_gone() {
                return Err(RequestError::BadState);
            }
            job.set_state(JobState::Finished);
            persist(core, job_id)
        }
    }
}

/// Runs one local request and routes its result to the coordinator that issued it.
///
/// Preemption requests superseded by a timeout are dropped without touching the job. A
/// deleted job is purged after the coordinator has seen the completion.
pub fn process_local_request(core: &mut Core, comm: &mut impl Comm, request: LocalRequest) {
    if let Some(continuation) = &request.continuation {
        if !is_preempt_request_current(core, continuation) {
            log::debug!(
                "Dropping superseded {:?} of job {}",
                request.kind,
                request.job_id
            );
            return;
        }
    }
    log::debug!("Processing {:?} of job {}", request.kind, request.job_id);
    let result = handle_local_request(core, &request);
    if let Err(error) = result {
        log::debug!(
            "Request {:?} of job {} failed: {error} ({})",
            request.kind,
            request.job_id,
            error.code()
        );
    }
    if let Some(continuation) = request.continuation {
        on_preempt_method_finished(core, comm, continuation, result);
    }
    if result.is_ok() && request.kind == LocalRequestKind::DeleteJob {
        if let Err(error) = core.purge_job(&request.job_id) {
            log::error!("Cannot purge job {}: {error}", request.job_id);
        }
    }
}
