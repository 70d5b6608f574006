use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::server::comm::{CommReceivers, CommSenderRef, ToSchedulerMessage};
use crate::server::core::CoreRef;
use crate::server::preempt::reactor::{on_preempt_jobs, on_preempt_timeouts};
use crate::server::preempt::{PreemptJobsRequest, PreemptReply};
use crate::server::request::{LocalRequest, RequestError, process_local_request};

/// Executes queued local requests one at a time.
pub async fn dispatch_process(
    core_ref: CoreRef,
    comm_ref: CommSenderRef,
    mut requests: UnboundedReceiver<LocalRequest>,
) {
    while let Some(request) = requests.recv().await {
        let mut core = core_ref.get_mut();
        let mut comm = comm_ref.get_mut();
        process_local_request(&mut core, &mut *comm, request);
    }
    log::debug!("Local request pipeline closed");
}

/// Periodically fails preemption methods that did not finish in time.
pub async fn preempt_timeout_process(core_ref: CoreRef, comm_ref: CommSenderRef, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        on_preempt_timeouts(
            &mut core_ref.get_mut(),
            &mut *comm_ref.get_mut(),
            Instant::now(),
        );
    }
}

fn sweep_period(timeout: Duration) -> Duration {
    (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(10))
}

/// Runs one Preempt-Jobs request until its reply is produced.
pub async fn run_preempt_batch(
    core_ref: &CoreRef,
    request: PreemptJobsRequest,
) -> Result<PreemptReply, RequestError> {
    let (comm_ref, receivers) = CommSenderRef::create();
    let CommReceivers {
        local_requests,
        mut schedulers,
    } = receivers;
    let connection = request.connection;

    on_preempt_jobs(&mut core_ref.get_mut(), &mut *comm_ref.get_mut(), request);

    let period = sweep_period(core_ref.get().preempt_timeout());
    let dispatch = dispatch_process(core_ref.clone(), comm_ref.clone(), local_requests);
    let timeouts = preempt_timeout_process(core_ref.clone(), comm_ref.clone(), period);
    let reply = async {
        while let Some((target, message)) = schedulers.recv().await {
            if target == connection {
                return Some(message);
            }
            log::warn!("Dropping message for connection {target}: {message:?}");
        }
        None
    };

    tokio::select! {
        () = dispatch => Err(RequestError::System),
        () = timeouts => Err(RequestError::System),
        message = reply => match message {
            Some(ToSchedulerMessage::PreemptReply(reply)) => Ok(reply),
            Some(ToSchedulerMessage::Rejected(error)) => Err(error),
            None => Err(RequestError::System),
        },
    }
}
