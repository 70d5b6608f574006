use std::time::{Duration, Instant};

use attrdb::store::MemoryStore;
use attrdb::{HoldTypes, ObjectKind};

use crate::ConnectionId;
use crate::server::attrdefs::job_attr;
use crate::server::job::JobState;
use crate::server::preempt::reactor::{
    clear_preempt_hold, on_preempt_jobs, on_preempt_method_finished, on_preempt_timeouts,
};
use crate::server::request::{
    JobSignal, LocalRequestKind, Permissions, RequestError, process_local_request,
};
use crate::tests::utils::env::{
    create_test_comm, create_test_core, create_test_core_with_store, preempt_request, reply_tags,
    run_local_requests, stored_records, submit_job,
};
use crate::tests::utils::job::JobBuilder;

#[test]
fn test_preempt_running_and_missing_job() {
    let mut core = create_test_core("SCRD");
    let mut comm = create_test_comm();
    submit_job(
        &mut core,
        JobBuilder::new("A")
            .requested("walltime", "01:00:00")
            .used("walltime", "00:05:00")
            .build(),
    );

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A", "B"]));
    let mut requests = comm.take_local_requests(1);
    let suspend = requests.pop().unwrap();
    assert_eq!(suspend.job_id, "A");
    assert_eq!(suspend.kind, LocalRequestKind::SignalJob(JobSignal::Suspend));
    assert_eq!(suspend.user, "scheduler");
    assert_eq!(suspend.host, "headnode");
    assert_eq!(suspend.permissions, Permissions::MANAGER);
    // B is resolved, but the reply waits for A
    comm.emptiness_check();
    assert_eq!(core.batch_count(), 1);

    process_local_request(&mut core, &mut comm, suspend);
    let reply = comm.take_reply();
    assert_eq!(reply.code, 0);
    assert_eq!(reply_tags(&reply), vec![("A", "S"), ("B", "D")]);
    comm.emptiness_check();
    assert_eq!(core.batch_count(), 0);

    let job = core.get_job("A").unwrap();
    assert_eq!(job.state(), JobState::Suspended);
    assert!(job.preempt.is_none());
    assert!(job.attrs[job_attr::SCHED_PREEMPTED].as_long().is_some());
    assert!(!job.attrs.is_modified());

    let records = stored_records(core.store(), ObjectKind::Job, "A");
    assert!(records.iter().any(|r| r.name == "sched_preempted"));
    assert!(records.iter().any(|r| r.name == "job_state" && r.value == "S"));
}

#[test]
fn test_preempt_reply_sent_once_in_any_order() {
    let mut core = create_test_core("S");
    let mut comm = create_test_comm();
    for id in ["1", "2", "3"] {
        submit_job(&mut core, JobBuilder::new(id).build());
    }
    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["1", "2", "3"]));
    let requests = comm.take_local_requests(3);

    let mut remaining = requests.len();
    for request in requests.into_iter().rev() {
        comm.emptiness_check();
        process_local_request(&mut core, &mut comm, request);
        remaining -= 1;
        if remaining > 0 {
            assert!(comm.replies.is_empty());
        }
    }
    let reply = comm.take_reply();
    assert_eq!(reply.code, 0);
    assert_eq!(
        reply_tags(&reply),
        vec![("1", "S"), ("2", "S"), ("3", "S")]
    );
    comm.emptiness_check();
}

#[test]
fn test_preempt_not_running_jobs() {
    let mut core = create_test_core("SCR");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("q").state(JobState::Queued).build());
    submit_job(&mut core, JobBuilder::new("m").state(JobState::Moved).build());
    submit_job(&mut core, JobBuilder::new("x").state(JobState::Expired).build());
    submit_job(&mut core, JobBuilder::new("e").state(JobState::Exiting).build());

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["q", "m", "x", "e"]));
    let reply = comm.take_reply();
    assert_eq!(
        reply_tags(&reply),
        vec![("q", "Q"), ("m", "D"), ("x", "D"), ("e", "000")]
    );
    assert_eq!(reply.code, 1);
    comm.emptiness_check();
    assert_eq!(core.batch_count(), 0);
}

#[test]
fn test_preempt_job_finished_before_lookup() {
    let mut core = create_test_core("SCR");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("A").build());
    core.get_job_mut("A").unwrap().set_state(JobState::Finished);

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    let reply = comm.take_reply();
    assert_eq!(reply.code, 0);
    assert_eq!(reply_tags(&reply), vec![("A", "D")]);
    comm.emptiness_check();
}

#[test]
fn test_preempt_empty_request() {
    let mut core = create_test_core("SCR");
    let mut comm = create_test_comm();
    on_preempt_jobs(&mut core, &mut comm, preempt_request(&[]));
    let reply = comm.take_reply();
    assert_eq!(reply.code, 0);
    assert!(reply.jobs.is_empty());
    assert_eq!(core.batch_count(), 0);
}

#[test]
fn test_preempt_unknown_connection() {
    let mut core = create_test_core("SCR");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("A").build());

    let mut request = preempt_request(&["A"]);
    request.connection = ConnectionId::new(7);
    on_preempt_jobs(&mut core, &mut comm, request);

    let rejections = comm.take_rejections(1);
    assert_eq!(rejections[0], (ConnectionId::new(7), RequestError::Internal));
    comm.emptiness_check();
    assert_eq!(core.batch_count(), 0);
    assert!(core.get_job("A").unwrap().preempt.is_none());
}

#[test]
fn test_preempt_issue_failure() {
    let mut core = create_test_core("SCR");
    let mut comm = create_test_comm();
    comm.fail_issue = true;
    submit_job(&mut core, JobBuilder::new("A").build());
    submit_job(&mut core, JobBuilder::new("B").state(JobState::Queued).build());

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A", "B"]));
    let reply = comm.take_reply();
    assert_eq!(reply.code, 1);
    assert_eq!(reply_tags(&reply), vec![("A", "000"), ("B", "Q")]);
    assert!(core.get_job("A").unwrap().preempt.is_none());
    assert_eq!(core.get_job("A").unwrap().state(), JobState::Running);
}

#[test]
fn test_preempt_duplicate_job_id() {
    let mut core = create_test_core("S");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("A").build());

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A", "A"]));
    assert_eq!(run_local_requests(&mut core, &mut comm), 1);
    let reply = comm.take_reply();
    assert_eq!(reply.code, 1);
    assert_eq!(reply_tags(&reply), vec![("A", "S"), ("A", "000")]);
}

#[test]
fn test_preempt_suspend_and_checkpoint_fail_requeue_succeeds() {
    let mut core = create_test_core("SCR");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("A").checkpoint("n").build());

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    let suspend = comm.take_local_requests(1).pop().unwrap();
    // The execution host refused the signal
    on_preempt_method_finished(
        &mut core,
        &mut comm,
        suspend.continuation.unwrap(),
        Err(RequestError::System),
    );

    let checkpoint = comm.take_local_requests(1).pop().unwrap();
    assert_eq!(
        checkpoint.kind,
        LocalRequestKind::HoldJob {
            hold: HoldTypes::SYSTEM
        }
    );
    process_local_request(&mut core, &mut comm, checkpoint);
    assert!(core.get_job("A").unwrap().hold().is_empty());

    let requeue = comm.take_local_requests(1).pop().unwrap();
    assert_eq!(requeue.kind, LocalRequestKind::Rerun);
    comm.emptiness_check();
    process_local_request(&mut core, &mut comm, requeue);

    let reply = comm.take_reply();
    assert_eq!(reply.code, 0);
    assert_eq!(reply_tags(&reply), vec![("A", "Q")]);
    comm.emptiness_check();

    let job = core.get_job("A").unwrap();
    assert_eq!(job.state(), JobState::Queued);
    assert!(job.hold().is_empty());
    let records = stored_records(core.store(), ObjectKind::Job, "A");
    assert!(
        !records
            .iter()
            .any(|r| r.name == "Hold_Types" && r.value.contains('s'))
    );
}

#[test]
fn test_preempt_all_methods_fail() {
    let mut core = create_test_core("SCR");
    let mut comm = create_test_comm();
    submit_job(
        &mut core,
        JobBuilder::new("A").checkpoint("n").rerunable(false).build(),
    );

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    let suspend = comm.take_local_requests(1).pop().unwrap();
    on_preempt_method_finished(
        &mut core,
        &mut comm,
        suspend.continuation.unwrap(),
        Err(RequestError::System),
    );
    // Checkpoint fails with NoSupport, requeue with NoRerun
    assert_eq!(run_local_requests(&mut core, &mut comm), 2);

    let reply = comm.take_reply();
    assert_eq!(reply.code, 1);
    assert_eq!(reply_tags(&reply), vec![("A", "000")]);
    comm.emptiness_check();

    let job = core.get_job("A").unwrap();
    assert_eq!(job.state(), JobState::Running);
    assert!(job.hold().is_empty());
    assert!(job.preempt.is_none());
}

#[test]
fn test_preempt_checkpoint_keeps_user_hold() {
    let mut core = create_test_core("C");
    let mut comm = create_test_comm();
    submit_job(
        &mut core,
        JobBuilder::new("A")
            .hold(HoldTypes::USER)
            .used("walltime", "00:10:00")
            .build(),
    );

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    assert_eq!(run_local_requests(&mut core, &mut comm), 1);
    let reply = comm.take_reply();
    assert_eq!(reply_tags(&reply), vec![("A", "C")]);

    let job = core.get_job("A").unwrap();
    assert_eq!(job.hold(), HoldTypes::USER);
    assert_eq!(job.state(), JobState::Held);
    assert!(!job.attrs[job_attr::RESOURCES_USED].is_set());
}

#[test]
fn test_preempt_checkpoint_requeues_job() {
    let mut core = create_test_core("C");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("A").build());

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    run_local_requests(&mut core, &mut comm);
    let reply = comm.take_reply();
    assert_eq!(reply_tags(&reply), vec![("A", "C")]);

    let job = core.get_job("A").unwrap();
    assert!(job.hold().is_empty());
    assert_eq!(job.state(), JobState::Queued);
}

#[test]
fn test_preempt_delete_purges_job() {
    let mut core = create_test_core("D");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("A").build());

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    assert_eq!(run_local_requests(&mut core, &mut comm), 1);
    let reply = comm.take_reply();
    assert_eq!(reply.code, 0);
    assert_eq!(reply_tags(&reply), vec![("A", "D")]);

    assert!(core.get_job("A").is_none());
    assert!(stored_records(core.store(), ObjectKind::Job, "A").is_empty());
}

#[test]
fn test_preempt_timeout_moves_to_next_method() {
    let mut core = create_test_core("SR");
    let mut comm = create_test_comm();
    submit_job(&mut core, JobBuilder::new("A").build());

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    let suspend = comm.take_local_requests(1).pop().unwrap();

    // Deadline not reached yet
    on_preempt_timeouts(&mut core, &mut comm, Instant::now());
    comm.emptiness_check();

    on_preempt_timeouts(
        &mut core,
        &mut comm,
        Instant::now() + Duration::from_secs(120),
    );
    let requeue = comm.take_local_requests(1).pop().unwrap();
    assert_eq!(requeue.kind, LocalRequestKind::Rerun);

    // The superseded suspend neither runs nor resolves the job
    process_local_request(&mut core, &mut comm, suspend);
    comm.emptiness_check();
    assert_eq!(core.get_job("A").unwrap().state(), JobState::Running);

    process_local_request(&mut core, &mut comm, requeue);
    let reply = comm.take_reply();
    assert_eq!(reply_tags(&reply), vec![("A", "Q")]);
    comm.emptiness_check();
}

#[test]
fn test_preempt_timed_out_checkpoint_leaves_no_hold() {
    let mut core = create_test_core("CR");
    let mut comm = create_test_comm();
    submit_job(
        &mut core,
        JobBuilder::new("A").used("walltime", "00:10:00").build(),
    );

    on_preempt_jobs(&mut core, &mut comm, preempt_request(&["A"]));
    let checkpoint = comm.take_local_requests(1).pop().unwrap();
    on_preempt_timeouts(
        &mut core,
        &mut comm,
        Instant::now() + Duration::from_secs(120),
    );
    let requeue = comm.take_local_requests(1).pop().unwrap();

    process_local_request(&mut core, &mut comm, checkpoint);
    comm.emptiness_check();
    let job = core.get_job("A").unwrap();
    assert_eq!(job.state(), JobState::Running);
    assert!(job.hold().is_empty());
    assert!(job.attrs[job_attr::RESOURCES_USED].is_set());

    process_local_request(&mut core, &mut comm, requeue);
    let reply = comm.take_reply();
    assert_eq!(reply.code, 0);
    assert_eq!(reply_tags(&reply), vec![("A", "Q")]);
    comm.emptiness_check();

    let job = core.get_job("A").unwrap();
    assert_eq!(job.state(), JobState::Queued);
    assert!(job.hold().is_empty());
    let records = stored_records(core.store(), ObjectKind::Job, "A");
    assert!(
        !records
            .iter()
            .any(|r| r.name == "Hold_Types" && r.value.contains('s'))
    );
}

#[test]
fn test_clear_preempt_hold_without_system_hold() {
    let mut store = MemoryStore::default();
    // Only the initial save may write
    store.set_write_budget(Some(1));
    let mut core = create_test_core_with_store("SCR", store);
    submit_job(
        &mut core,
        JobBuilder::new("A")
            .state(JobState::Queued)
            .hold(HoldTypes::USER)
            .build(),
    );

    clear_preempt_hold(&mut core, "A");
    clear_preempt_hold(&mut core, "A");
    let job = core.get_job("A").unwrap();
    assert_eq!(job.hold(), HoldTypes::USER);
    assert_eq!(job.state(), JobState::Held);
    assert!(!job.attrs.is_modified());
}

#[test]
fn test_clear_preempt_hold_keeps_other_holds() {
    let mut core = create_test_core("SCR");
    submit_job(
        &mut core,
        JobBuilder::new("A")
            .state(JobState::Queued)
            .hold(HoldTypes::USER | HoldTypes::SYSTEM)
            .build(),
    );
    core.get_job_mut("A").unwrap().attrs[job_attr::COMMENT].set_str("held by preemption");
    core.save_job("A", false).unwrap();

    clear_preempt_hold(&mut core, "A");
    let job = core.get_job("A").unwrap();
    assert_eq!(job.hold(), HoldTypes::USER);
    assert_eq!(job.state(), JobState::Held);
    assert_eq!(
        job.attrs[job_attr::COMMENT].as_str(),
        Some("held by preemption")
    );
    let records = stored_records(core.store(), ObjectKind::Job, "A");
    assert!(records.iter().any(|r| r.name == "Hold_Types" && r.value == "u"));
}

#[test]
fn test_clear_preempt_hold_releases_job() {
    let mut core = create_test_core("SCR");
    submit_job(
        &mut core,
        JobBuilder::new("A")
            .state(JobState::Held)
            .hold(HoldTypes::SYSTEM)
            .build(),
    );
    core.get_job_mut("A").unwrap().attrs[job_attr::COMMENT].set_str("held by preemption");
    core.save_job("A", false).unwrap();

    clear_preempt_hold(&mut core, "A");
    let job = core.get_job("A").unwrap();
    assert!(job.hold().is_empty());
    assert_eq!(job.state(), JobState::Queued);
    assert!(!job.attrs[job_attr::COMMENT].is_set());
    let records = stored_records(core.store(), ObjectKind::Job, "A");
    assert!(!records.iter().any(|r| r.name == "comment"));
    assert!(records.iter().any(|r| r.name == "job_state" && r.value == "Q"));
}
