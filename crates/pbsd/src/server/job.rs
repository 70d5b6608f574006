use std::fmt::{Display, Formatter};

use attrdb::{AttrArray, HoldTypes};
use serde::{Deserialize, Serialize};

use crate::server::attrdefs::{JOB_ATTR_DEFS, job_attr};
use crate::server::preempt::JobPreemption;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Transit,
    Queued,
    Held,
    Waiting,
    Running,
    Exiting,
    Suspended,
    Expired,
    Finished,
    Moved,
}

const STATE_LETTERS: [(char, JobState); 10] = [
    ('T', JobState::Transit),
    ('Q', JobState::Queued),
    ('H', JobState::Held),
    ('W', JobState::Waiting),
    ('R', JobState::Running),
    ('E', JobState::Exiting),
    ('S', JobState::Suspended),
    ('X', JobState::Expired),
    ('F', JobState::Finished),
    ('M', JobState::Moved),
];

impl JobState {
    pub fn letter(&self) -> char {
        STATE_LETTERS
            .iter()
            .find(|(_, state)| state == self)
            .map(|(letter, _)| *letter)
            .unwrap_or('?')
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        STATE_LETTERS
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, state)| *state)
    }

    /// The job is gone from the point of view of a scheduler.
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            JobState::Expired | JobState::Finished | JobState::Moved
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: String,
    state: JobState,
    pub attrs: AttrArray,

    /// Present only while a preempt batch waits for this job.
    pub preempt: Option<JobPreemption>,
}

impl Job {
    pub fn new(id: impl Into<String>, state: JobState) -> Self {
        let mut job = Job {
            id: id.into(),
            state,
            attrs: AttrArray::new(&JOB_ATTR_DEFS),
            preempt: None,
        };
        job.set_state(state);
        job
    }

    /// Builds a job from recovered attributes; the state comes from `job_state`.
    pub fn from_attrs(id: impl Into<String>, attrs: AttrArray) -> Option<Self> {
        let state = attrs[job_attr::STATE]
            .as_str()
            .and_then(|value| value.chars().next())
            .and_then(JobState::from_letter)?;
        Some(Job {
            id: id.into(),
            state,
            attrs,
            preempt: None,
        })
    }

    #[inline]
    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
        let attr = &mut self.attrs[job_attr::STATE];
        if attr.as_str().and_then(|value| value.chars().next()) != Some(state.letter()) {
            attr.set_str(state.letter().to_string());
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    pub fn hold(&self) -> HoldTypes {
        self.attrs[job_attr::HOLD].as_hold()
    }

    /// Moves a job between Queued and Held according to its hold types.
    pub fn evaluate_hold_state(&mut self) {
        match (self.state, self.hold().is_empty()) {
            (JobState::Held, true) => self.set_state(JobState::Queued),
            (JobState::Queued, false) => self.set_state(JobState::Held),
            _ => {}
        }
    }

    /// `Checkpoint=n` forbids checkpointing.
    pub fn can_checkpoint(&self) -> bool {
        self.attrs[job_attr::CHECKPOINT].as_str() != Some("n")
    }

    pub fn is_rerunable(&self) -> bool {
        self.attrs[job_attr::RERUNABLE].as_bool().unwrap_or(true)
    }

    /// Requested and used time in seconds for the preemption heuristics.
    ///
    /// Soft walltime is preferred over walltime; cput is the last resort and is compared
    /// with used cput.
    pub fn requested_and_used_time(&self) -> Option<(u64, u64)> {
        let requested = self.attrs[job_attr::RESOURCE_LIST].as_resources()?;
        let used = self.attrs[job_attr::RESOURCES_USED].as_resources();
        let (requested, used_name) = if let Some(value) = requested.get("soft_walltime") {
            (value, "walltime")
        } else if let Some(value) = requested.get("walltime") {
            (value, "walltime")
        } else {
            (requested.get("cput")?, "cput")
        };
        let used = used?.get(used_name)?.as_seconds()?;
        Some((requested.as_seconds()?, used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::job::JobBuilder;

    #[test]
    fn state_is_mirrored_in_attribute() {
        let mut job = Job::new("1.server", JobState::Queued);
        assert_eq!(job.attrs[job_attr::STATE].as_str(), Some("Q"));
        job.set_state(JobState::Suspended);
        assert_eq!(job.attrs[job_attr::STATE].as_str(), Some("S"));

        let recovered = Job::from_attrs("1.server", job.attrs.clone()).unwrap();
        assert_eq!(recovered.state(), JobState::Suspended);
    }

    #[test]
    fn soft_walltime_takes_precedence() {
        let job = JobBuilder::new("1")
            .requested("walltime", "01:00:00")
            .requested("soft_walltime", "00:30:00")
            .used("walltime", "00:15:00")
            .build();
        assert_eq!(job.requested_and_used_time(), Some((1800, 900)));
    }

    #[test]
    fn cput_uses_used_cput() {
        let job = JobBuilder::new("1")
            .requested("cput", "00:10:00")
            .used("cput", "00:05:00")
            .used("walltime", "00:09:00")
            .build();
        assert_eq!(job.requested_and_used_time(), Some((600, 300)));
    }

    #[test]
    fn missing_usage_is_undeterminable() {
        let job = JobBuilder::new("1").requested("walltime", "01:00:00").build();
        assert_eq!(job.requested_and_used_time(), None);
        let job = JobBuilder::new("1").used("walltime", "01:00:00").build();
        assert_eq!(job.requested_and_used_time(), None);
    }

    #[test]
    fn hold_state_evaluation() {
        let mut job = JobBuilder::new("1")
            .state(JobState::Queued)
            .hold(HoldTypes::USER)
            .build();
        job.evaluate_hold_state();
        assert_eq!(job.state(), JobState::Held);

        job.attrs[job_attr::HOLD].clear();
        job.evaluate_hold_state();
        assert_eq!(job.state(), JobState::Queued);
    }
}
