//! Ordering policies.
//!
//! A [`Policy`] decides which pending job is admitted next. Every policy
//! answers "should `a` go before `b`?" and the engine keeps the best
//! candidate while scanning the queue. The deadline-aware disciplines rank
//! all candidates against one `now`. Equal rankings fall back to submission
//! time, then id, so the winner never depends on queue iteration order.
//!
//! | Name | Discipline |
//! |------|------------|
//! | `fifo` | oldest submission first, then id |
//! | `space` | smallest `desired` resource count first, then FIFO |
//! | `time` | shortest expected duration first, jobs without an estimate last, then FIFO |
//! | `mixed(p, ...)` | `a` wins unless any component prefers `b` |
//! | `edf` | priority, then earliest effective deadline |
//! | `edf-extended` | priority, deadline presence, execution state, slack |

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edf;
use crate::error::SchedError;
use crate::job::Job;

/// A scheduling discipline, selected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Policy {
    #[default]
    Fifo,
    Space,
    Time,
    Mixed(Vec<Policy>),
    Edf,
    EdfExtended,
}

impl Policy {
    /// Whether this policy ranks every pair of jobs consistently, so the
    /// pending set can be sorted. Only `mixed(...)` does not.
    pub fn is_total(&self) -> bool {
        !matches!(self, Policy::Mixed(_))
    }

    /// `true` if `a` should be admitted before `b`.
    pub fn is_preferred(&self, a: &Job, b: &Job, now: DateTime<Utc>) -> bool {
        match self {
            Policy::Mixed(policies) => !policies.iter().any(|p| p.is_preferred(b, a, now)),
            _ => self.compare(a, b, now).is_some_and(Ordering::is_lt),
        }
    }

    /// Rank two jobs, `Less` meaning `a` goes first. `None` for `mixed(...)`,
    /// which only answers pairwise.
    ///
    /// Ties fall back to submission time, then id.
    pub fn compare(&self, a: &Job, b: &Job, now: DateTime<Utc>) -> Option<Ordering> {
        let ordering = match self {
            Policy::Fifo => by_submission(a, b),
            Policy::Space => a
                .resources
                .desired
                .cmp(&b.resources.desired)
                .then_with(|| by_submission(a, b)),
            Policy::Time => match (a.expected_duration, b.expected_duration) {
                (Some(a_duration), Some(b_duration)) => a_duration.cmp(&b_duration),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| by_submission(a, b)),
            Policy::Edf => edf::compare(a, b, now),
            Policy::EdfExtended => edf::compare_extended(a, b, now),
            Policy::Mixed(_) => return None,
        };
        Some(ordering)
    }

    /// Pick the job to admit next.
    pub fn select<'a, I>(&self, jobs: I, now: DateTime<Utc>) -> Option<&'a Job>
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let mut best: Option<&Job> = None;
        for candidate in jobs {
            match best {
                Some(current) if !self.is_preferred(candidate, current, now) => {}
                _ => best = Some(candidate),
            }
        }
        best
    }

    /// Order every job, first to be admitted first.
    ///
    /// Total policies sort in O(n log n). `mixed(...)` repeatedly selects the
    /// best remaining job, which is O(n²) comparisons but matches the order
    /// successive ticks would admit in when resources are plentiful.
    pub fn order_all<'a, I>(&self, jobs: I, now: DateTime<Utc>) -> Vec<&'a Job>
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let mut remaining: Vec<&Job> = jobs.into_iter().collect();
        if self.is_total() {
            remaining.sort_by(|a, b| self.compare(a, b, now).unwrap_or(Ordering::Equal));
            return remaining;
        }

        let mut ordered = Vec::with_capacity(remaining.len());
        while let Some(best) = self.select(remaining.iter().copied(), now) {
            remaining.retain(|job| job.id != best.id);
            ordered.push(best);
        }
        ordered
    }
}

fn by_submission(a: &Job, b: &Job) -> Ordering {
    a.submitted_at
        .cmp(&b.submitted_at)
        .then_with(|| a.id.cmp(&b.id))
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Fifo => write!(f, "fifo"),
            Policy::Space => write!(f, "space"),
            Policy::Time => write!(f, "time"),
            Policy::Edf => write!(f, "edf"),
            Policy::EdfExtended => write!(f, "edf-extended"),
            Policy::Mixed(policies) => {
                write!(f, "mixed(")?;
                for (i, policy) in policies.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{policy}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl FromStr for Policy {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let policy = match s.to_ascii_lowercase().as_str() {
            "fifo" => Policy::Fifo,
            "space" => Policy::Space,
            "time" => Policy::Time,
            "edf" => Policy::Edf,
            "edf-extended" | "edf_extended" => Policy::EdfExtended,
            lower => {
                let inner = lower
                    .strip_prefix("mixed(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| {
                        SchedError::Configuration(format!("unknown ordering policy: {s}"))
                    })?;
                Policy::Mixed(
                    split_top_level(inner)?
                        .into_iter()
                        .map(str::parse)
                        .collect::<Result<_, _>>()?,
                )
            }
        };
        Ok(policy)
    }
}

/// Split `a, mixed(b, c), d` on the commas outside parentheses.
fn split_top_level(s: &str) -> Result<Vec<&str>, SchedError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    SchedError::Configuration(format!("unbalanced parentheses in: {s}"))
                })?;
            }
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SchedError::Configuration(format!(
            "unbalanced parentheses in: {s}"
        )));
    }
    let last = &s[start..];
    if !last.trim().is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    Ok(parts)
}

impl TryFrom<String> for Policy {
    type Error = SchedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Policy> for String {
    fn from(policy: Policy) -> Self {
        policy.to_string()
    }
}
