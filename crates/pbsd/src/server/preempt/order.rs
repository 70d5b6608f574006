use anyhow::anyhow;
use nom::character::complete::{multispace0, multispace1, satisfy};
use nom::combinator::map_res;
use nom::multi::{many0, many1};
use nom::sequence::{delimited, pair, preceded, separated_pair};
use smallvec::smallvec;

use crate::common::config::DEFAULT_PREEMPT_ORDER;
use crate::common::parser::{NomResult, consume_all, p_u32};
use crate::server::job::Job;
use crate::server::preempt::{PreemptMethod, PreemptMethods};

/// Methods to try for jobs whose remaining time falls into `low_range..=high_range` percent.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PreemptOrdering {
    pub high_range: u32,
    pub low_range: u32,
    pub methods: PreemptMethods,
}

impl Default for PreemptOrdering {
    fn default() -> Self {
        PreemptOrdering {
            high_range: 100,
            low_range: 0,
            methods: smallvec![
                PreemptMethod::Suspend,
                PreemptMethod::Checkpoint,
                PreemptMethod::Requeue
            ],
        }
    }
}

fn p_method(input: &str) -> NomResult<'_, PreemptMethod> {
    map_res(satisfy(|c| c.is_ascii_alphabetic()), |c| {
        PreemptMethod::from_letter(c.to_ascii_uppercase())
            .ok_or_else(|| anyhow!("unknown preemption method '{c}'"))
    })(input)
}

fn p_group(input: &str) -> NomResult<'_, PreemptMethods> {
    map_res(many1(p_method), |methods| {
        let mut group = PreemptMethods::new();
        for method in methods {
            if group.contains(&method) {
                return Err(anyhow!("method '{}' is repeated", method.letter()));
            }
            group.push(method);
        }
        Ok(group)
    })(input)
}

type RawOrder = (PreemptMethods, Vec<(u32, PreemptMethods)>);

fn p_order(input: &str) -> NomResult<'_, RawOrder> {
    delimited(
        multispace0,
        pair(
            p_group,
            many0(preceded(
                multispace1,
                separated_pair(p_u32, multispace1, p_group),
            )),
        ),
        multispace0,
    )(input)
}

/// Parses a preemption order such as `"SCR 80 SC 50 S"`.
///
/// Every percentage closes the range of the group before it and opens the range of the
/// group after it.
pub fn parse_preempt_order(input: &str) -> anyhow::Result<Vec<PreemptOrdering>> {
    let (first, rest) = consume_all(p_order, input)?;
    let mut orderings = vec![PreemptOrdering {
        high_range: 100,
        low_range: 0,
        methods: first,
    }];
    for (percent, methods) in rest {
        if !(1..=99).contains(&percent) {
            return Err(anyhow!("percentage {percent} is outside of 1..99"));
        }
        let previous = orderings.last_mut().map(|o| {
            o.low_range = percent;
            o.high_range
        });
        if previous.is_some_and(|high| percent >= high) {
            return Err(anyhow!("percentages have to be decreasing"));
        }
        orderings.push(PreemptOrdering {
            high_range: percent,
            low_range: 0,
            methods,
        });
    }
    Ok(orderings)
}

pub fn default_orderings() -> Vec<PreemptOrdering> {
    parse_preempt_order(DEFAULT_PREEMPT_ORDER).unwrap_or_else(|_| vec![Default::default()])
}

/// Percentage of the requested time the job still has left, clamped to `0..=100`.
fn percent_left(requested: u64, used: u64) -> u32 {
    if used >= requested {
        return 0;
    }
    let used_percent = (used as u128 * 100 / requested as u128) as u32;
    100u32.saturating_sub(used_percent).min(100)
}

/// Picks the ordering for a job by how much of its requested time is left.
///
/// Falls back to the first ordering when the time cannot be determined or no range
/// matches. `None` only for an empty table.
pub fn select_order<'a>(job: &Job, orderings: &'a [PreemptOrdering]) -> Option<&'a PreemptOrdering> {
    let first = orderings.first()?;
    if orderings.len() == 1 {
        return Some(first);
    }
    let Some((requested, used)) = job.requested_and_used_time().filter(|(req, _)| *req > 0)
    else {
        log::info!(
            "Cannot determine used time of job {}, using the first preemption order",
            job.id
        );
        return Some(first);
    };
    let left = percent_left(requested, used);
    let selected = orderings
        .iter()
        .find(|o| o.low_range <= left && left <= o.high_range)
        .unwrap_or(first);
    log::debug!(
        "Job {} has {left}% of time left, preemption order {:?}",
        job.id,
        selected.methods
    );
    Some(selected)
}
