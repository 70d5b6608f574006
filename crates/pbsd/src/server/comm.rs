use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::ConnectionId;
use crate::common::WrappedRcRefCell;
use crate::server::preempt::PreemptReply;
use crate::server::request::{LocalRequest, RequestError};

pub trait Comm {
    /// Queues a request into the server's own request pipeline.
    fn issue_local_request(&mut self, request: LocalRequest) -> Result<(), RequestError>;
    fn send_preempt_reply(&mut self, connection: ConnectionId, reply: PreemptReply);
    fn reject_request(&mut self, connection: ConnectionId, error: RequestError);
}

/// Message sent back to a scheduler connection.
#[derive(Debug)]
pub enum ToSchedulerMessage {
    PreemptReply(PreemptReply),
    Rejected(RequestError),
}

pub struct CommSender {
    local_requests: UnboundedSender<LocalRequest>,
    schedulers: UnboundedSender<(ConnectionId, ToSchedulerMessage)>,
}

pub type CommSenderRef = WrappedRcRefCell<CommSender>;

pub struct CommReceivers {
    pub local_requests: UnboundedReceiver<LocalRequest>,
    pub schedulers: UnboundedReceiver<(ConnectionId, ToSchedulerMessage)>,
}

impl CommSenderRef {
    pub fn create() -> (Self, CommReceivers) {
        let (local_tx, local_rx) = unbounded_channel();
        let (sched_tx, sched_rx) = unbounded_channel();
        let comm = WrappedRcRefCell::wrap(CommSender {
            local_requests: local_tx,
            schedulers: sched_tx,
        });
        (
            comm,
            CommReceivers {
                local_requests: local_rx,
                schedulers: sched_rx,
            },
        )
    }
}

impl CommSender {
    fn send_to_scheduler(&mut self, connection: ConnectionId, message: ToSchedulerMessage) {
        if self.schedulers.send((connection, message)).is_err() {
            log::error!("Scheduler connection {connection} is closed, message dropped");
        }
    }
}

impl Comm for CommSender {
    fn issue_local_request(&mut self, request: LocalRequest) -> Result<(), RequestError> {
        self.local_requests.send(request).map_err(|_| {
            log::error!("Local request pipeline is closed");
            RequestError::System
        })
    }

    fn send_preempt_reply(&mut self, connection: ConnectionId, reply: PreemptReply) {
        self.send_to_scheduler(connection, ToSchedulerMessage::PreemptReply(reply));
    }

    fn reject_request(&mut self, connection: ConnectionId, error: RequestError) {
        self.send_to_scheduler(connection, ToSchedulerMessage::Rejected(error));
    }
}
