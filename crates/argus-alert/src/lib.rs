//! Rule evaluation for the monitoring engine.
//!
//! A [`Rule`] observes one fact out of a probe's fact bag and keeps private
//! continuity data in its own slot of the probe state. The closed set of
//! rule kinds lives in [`rules`]; descriptors resolve to trait objects
//! through [`factory::build_rule`].

pub mod factory;
pub mod rules;

#[cfg(test)]
mod tests;

use anyhow::Result;
use argus_common::types::{Alert, Facts, ProbeState, RuleKind, Severity};
use chrono::{DateTime, Utc};

/// Evaluation context handed to a rule for one probe run.
///
/// `state` aliases the probe state the scheduler loaded at the start of the
/// run; the scheduler is the sole writer to storage. A rule must confine its
/// writes to `state.rule[<its id>]`.
pub struct RuleContext<'a> {
    pub probe_id: &'a str,
    pub state: &'a mut ProbeState,
    pub now: DateTime<Utc>,
}

/// An evaluator over a fact bag and its own private persistent slot.
///
/// Implementations must be deterministic given the same facts and prior
/// state: alert ids are derived from the logical event, and the pipeline
/// relies on identical events producing identical ids.
pub trait Rule: Send + Sync {
    /// Unique identifier for this rule instance within its probe.
    fn id(&self) -> &str;

    fn kind(&self) -> RuleKind;

    /// The dotted fact key this rule observes (e.g. `"evm.block"`).
    fn fact(&self) -> &str;

    fn severity(&self) -> Severity;

    /// Evaluates the fact bag. Returns zero or more alerts; a missing or
    /// non-coercible fact evaluates to no alerts, not an error.
    fn evaluate(&self, facts: &Facts, ctx: &mut RuleContext<'_>) -> Result<Vec<Alert>>;
}
