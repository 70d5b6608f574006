use std::time::Instant;

use attrdb::codec::set_attr;
use attrdb::{AttrKind, AttrValue, Attribute, BatchOp, HoldTypes};

use crate::PreemptBatchId;
use crate::server::attrdefs::job_attr;
use crate::server::comm::Comm;
use crate::server::core::Core;
use crate::server::job::JobState;
use crate::server::preempt::order::select_order;
use crate::server::preempt::{
    JobPreemption, PreemptBatch, PreemptContinuation, PreemptJobsRequest, PreemptMethod,
    PreemptOutcome,
};
use crate::server::request::{JobSignal, LocalRequest, LocalRequestKind, RequestError};

/// Handles a Preempt-Jobs request of a scheduler.
///
/// Jobs that are not running are resolved right away; for running jobs the first method of
/// their preemption order is issued. The reply is sent once every job is resolved.
pub fn on_preempt_jobs(core: &mut Core, comm: &mut impl Comm, request: PreemptJobsRequest) {
    let Some(scheduler) = core.get_scheduler(request.connection) else {
        log::error!(
            "Preempt request from unknown connection {}",
            request.connection
        );
        comm.reject_request(request.connection, RequestError::Internal);
        return;
    };
    let orderings = scheduler.orderings.clone();

    let batch_id = core.new_batch_id();
    core.insert_batch(batch_id, PreemptBatch::new(&request));
    log::debug!(
        "Preempt batch {batch_id} with {} jobs from {}@{}",
        request.job_ids.len(),
        request.user,
        request.host
    );

    for (slot, job_id) in request.job_ids.iter().enumerate() {
        let outcome = match core.get_job_mut(job_id) {
            None => Some(PreemptOutcome::AlreadyGone),
            Some(job) if job.preempt.is_some() => {
                log::warn!("Job {job_id} is already being preempted");
                Some(PreemptOutcome::Failed)
            }
            Some(job) if job.is_running() => {
                let methods = select_order(job, &orderings)
                    .map(|ordering| ordering.methods.clone())
                    .unwrap_or_default();
                job.preempt = Some(JobPreemption::new(batch_id, slot, methods));
                match issue_preempt_request(core, comm, job_id) {
                    Ok(()) => None,
                    Err(error) => {
                        log::warn!("Cannot start preemption of job {job_id}: {error}");
                        detach_job(core, job_id);
                        Some(PreemptOutcome::Failed)
                    }
                }
            }
            Some(job) => match job.state() {
                JobState::Queued => Some(PreemptOutcome::AlreadyQueued),
                state if state.is_gone() => Some(PreemptOutcome::AlreadyGone),
                state => {
                    log::debug!("Job {job_id} cannot be preempted in state {state}");
                    Some(PreemptOutcome::Failed)
                }
            },
        };
        if let Some(outcome) = outcome {
            record_outcome(core, comm, batch_id, slot, job_id, outcome);
        }
    }
    // Nothing was recorded for an empty request
    reply_if_complete(core, comm, batch_id);
}

/// Issues the current method of a job's preemption order.
pub fn issue_preempt_request(
    core: &mut Core,
    comm: &mut impl Comm,
    job_id: &str,
) -> Result<(), RequestError> {
    let timeout = core.preempt_timeout();
    let batch_id = core
        .get_job(job_id)
        .and_then(|job| job.preempt.as_ref())
        .map(|preempt| preempt.batch_id)
        .ok_or(RequestError::Internal)?;
    let (user, host, permissions) = core
        .get_batch(batch_id)
        .map(|batch| (batch.user.clone(), batch.host.clone(), batch.permissions))
        .ok_or(RequestError::Internal)?;
    let preempt = core
        .get_job_mut(job_id)
        .and_then(|job| job.preempt.as_mut())
        .ok_or(RequestError::Internal)?;
    let Some(method) = preempt.current_method() else {
        return Err(RequestError::Internal);
    };
    preempt.attempt += 1;

    let kind = match method {
        PreemptMethod::Suspend => LocalRequestKind::SignalJob(JobSignal::Suspend),
        PreemptMethod::Checkpoint => LocalRequestKind::HoldJob {
            hold: HoldTypes::SYSTEM,
        },
        PreemptMethod::Requeue => LocalRequestKind::Rerun,
        PreemptMethod::Delete => LocalRequestKind::DeleteJob,
    };
    let request = LocalRequest {
        job_id: job_id.to_string(),
        kind,
        user,
        host,
        permissions,
        continuation: Some(PreemptContinuation {
            job_id: job_id.to_string(),
            method,
            attempt: preempt.attempt,
        }),
    };
    log::debug!("Preempting job {job_id} by {method}");
    comm.issue_local_request(request)?;
    preempt.deadline = Some(Instant::now() + timeout);
    Ok(())
}

/// Completion of a preemption method issued by [`issue_preempt_request`].
pub fn on_preempt_method_finished(
    core: &mut Core,
    comm: &mut impl Comm,
    continuation: PreemptContinuation,
    result: Result<(), RequestError>,
) {
    let job_id = continuation.job_id.as_str();
    let Some(preempt) = current_preemption(core, &continuation) else {
        log::debug!(
            "Ignoring stale {} completion of job {job_id}",
            continuation.method
        );
        return;
    };
    let (batch_id, slot) = (preempt.batch_id, preempt.slot);

    match result {
        Ok(()) => {
            if let Some(job) = core.get_job_mut(job_id) {
                job.attrs[job_attr::SCHED_PREEMPTED].set_long(chrono::Utc::now().timestamp());
            }
            if continuation.method == PreemptMethod::Checkpoint {
                clear_preempt_hold(core, job_id);
            }
            if let Err(error) = core.save_job(job_id, false) {
                log::error!("Cannot save preempted job {job_id}: {error}");
            }
            log::debug!("Job {job_id} preempted by {}", continuation.method);
            detach_job(core, job_id);
            record_outcome(
                core,
                comm,
                batch_id,
                slot,
                job_id,
                continuation.method.into(),
            );
        }
        Err(error) => {
            log::info!(
                "Preemption of job {job_id} by {} failed: {error}",
                continuation.method
            );
            if continuation.method == PreemptMethod::Checkpoint {
                clear_preempt_hold(core, job_id);
            }
            advance_preemption(core, comm, job_id, batch_id, slot);
        }
    }
}

/// The preemption state of the job, if `continuation` belongs to its in-flight method.
fn current_preemption<'a>(
    core: &'a Core,
    continuation: &PreemptContinuation,
) -> Option<&'a JobPreemption> {
    core.get_job(&continuation.job_id)
        .and_then(|job| job.preempt.as_ref())
        .filter(|p| {
            p.attempt == continuation.attempt && p.current_method() == Some(continuation.method)
        })
}

/// False once the method was timed out or the job left its preemption batch.
pub fn is_preempt_request_current(core: &Core, continuation: &PreemptContinuation) -> bool {
    current_preemption(core, continuation).is_some()
}

/// Moves to the next method, or fails the job when the order is exhausted.
fn advance_preemption(
    core: &mut Core,
    comm: &mut impl Comm,
    job_id: &str,
    batch_id: PreemptBatchId,
    slot: usize,
) {
    let has_next = core
        .get_job_mut(job_id)
        .and_then(|job| job.preempt.as_mut())
        .map(|preempt| {
            preempt.cursor += 1;
            preempt.deadline = None;
            preempt.current_method().is_some()
        })
        .unwrap_or(false);
    if has_next {
        match issue_preempt_request(core, comm, job_id) {
            Ok(()) => return,
            Err(error) => log::warn!("Cannot issue next preemption method of {job_id}: {error}"),
        }
    } else {
        log::info!("All preemption methods failed for job {job_id}");
    }
    detach_job(core, job_id);
    record_outcome(core, comm, batch_id, slot, job_id, PreemptOutcome::Failed);
}

/// Removes the system hold placed by a checkpoint attempt.
///
/// Nothing is written when the job has no system hold.
pub fn clear_preempt_hold(core: &mut Core, job_id: &str) {
    let Some(job) = core.get_job_mut(job_id) else {
        return;
    };
    if !job.hold().contains(HoldTypes::SYSTEM) {
        return;
    }
    let mut system = Attribute::new(AttrKind::Hold);
    system.value = AttrValue::Hold(HoldTypes::SYSTEM);
    if let Err(error) = set_attr(&mut job.attrs[job_attr::HOLD], &system, BatchOp::Decr) {
        log::error!("Cannot release hold of job {job_id}: {error}");
        return;
    }
    job.evaluate_hold_state();
    if job.hold().is_empty() {
        job.attrs[job_attr::COMMENT].clear();
    }
    if let Err(error) = core.save_job(job_id, false) {
        log::error!("Cannot save job {job_id} after releasing its hold: {error}");
    }
}

/// Fails every in-flight method whose deadline passed before `now`.
pub fn on_preempt_timeouts(core: &mut Core, comm: &mut impl Comm, now: Instant) {
    let mut expired: Vec<PreemptContinuation> = core
        .jobs()
        .filter_map(|job| {
            let preempt = job.preempt.as_ref()?;
            if preempt.deadline? > now {
                return None;
            }
            Some(PreemptContinuation {
                job_id: job.id.clone(),
                method: preempt.current_method()?,
                attempt: preempt.attempt,
            })
        })
        .collect();
    expired.sort_unstable_by(|a, b| a.job_id.cmp(&b.job_id));
    for continuation in expired {
        log::warn!(
            "Preemption of job {} by {} timed out",
            continuation.job_id,
            continuation.method
        );
        on_preempt_method_finished(core, comm, continuation, Err(RequestError::Timeout));
    }
}

fn detach_job(core: &mut Core, job_id: &str) {
    if let Some(job) = core.get_job_mut(job_id) {
        job.preempt = None;
    }
}

fn record_outcome(
    core: &mut Core,
    comm: &mut impl Comm,
    batch_id: PreemptBatchId,
    slot: usize,
    job_id: &str,
    outcome: PreemptOutcome,
) {
    let Some(batch) = core.get_batch_mut(batch_id) else {
        log::error!("Preempt batch {batch_id} of job {job_id} does not exist");
        return;
    };
    if !batch.record(slot, outcome) {
        log::error!("Job {job_id} already resolved in preempt batch {batch_id}");
        return;
    }
    log::debug!(
        "Job {job_id} resolved as {} ({}/{batch_id})",
        outcome.tag(),
        batch.resolved()
    );
    reply_if_complete(core, comm, batch_id);
}

fn reply_if_complete(core: &mut Core, comm: &mut impl Comm, batch_id: PreemptBatchId) {
    if !core
        .get_batch(batch_id)
        .is_some_and(|batch| batch.is_complete())
    {
        return;
    }
    if let Some(batch) = core.remove_batch(batch_id) {
        let connection = batch.connection;
        comm.send_preempt_reply(connection, batch.into_reply());
    }
}
