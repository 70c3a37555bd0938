use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Verdict, VerdictKind};
use crate::rules::{Rule, TargetContext};

/// Per-rule lifecycle inside a run. `Recorded`, `Skipped` and `Errored` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Pending,
    ApplicabilityChecked,
    Collected,
    Evaluated,
    Recorded,
    Skipped,
    Errored,
}

impl RuleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Recorded | Self::Skipped | Self::Errored)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub compliant: usize,
    pub finding: usize,
    pub not_applicable: usize,
    pub manual_review: usize,
    pub error: usize,
}

impl VerdictCounts {
    pub fn add(&mut self, kind: VerdictKind) {
        *self.slot(kind) += 1;
    }

    pub fn get(&self, kind: VerdictKind) -> usize {
        match kind {
            VerdictKind::Compliant => self.compliant,
            VerdictKind::Finding => self.finding,
            VerdictKind::NotApplicable => self.not_applicable,
            VerdictKind::ManualReview => self.manual_review,
            VerdictKind::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        VerdictKind::ALL.iter().map(|kind| self.get(*kind)).sum()
    }

    /// `Compliant / (Compliant + Finding)`; verdicts that say nothing about
    /// compliance stay out of the denominator.
    pub fn pass_rate(&self) -> Option<f64> {
        let decided = self.compliant + self.finding;
        (decided > 0).then(|| self.compliant as f64 / decided as f64)
    }

    fn slot(&mut self, kind: VerdictKind) -> &mut usize {
        match kind {
            VerdictKind::Compliant => &mut self.compliant,
            VerdictKind::Finding => &mut self.finding,
            VerdictKind::NotApplicable => &mut self.not_applicable,
            VerdictKind::ManualReview => &mut self.manual_review,
            VerdictKind::Error => &mut self.error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule: Arc<Rule>,
    pub verdict: Verdict,
    pub state: RuleState,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub target: TargetContext,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    outcomes: Vec<RuleOutcome>,
    counts: VerdictCounts,
}

impl RunResult {
    pub fn outcomes(&self) -> &[RuleOutcome] {
        &self.outcomes
    }

    pub fn counts(&self) -> VerdictCounts {
        self.counts
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn verdict_for(&self, rule_id: &str) -> Option<&Verdict> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.rule.id == rule_id)
            .map(|outcome| &outcome.verdict)
    }

    /// `1` on any finding, `3` on any error, `0` when something was
    /// compliant, `2` when only not-applicable or manual-review verdicts exist.
    pub fn exit_code(&self) -> u8 {
        if self.counts.finding > 0 {
            1
        } else if self.counts.error > 0 {
            3
        } else if self.counts.compliant > 0 {
            0
        } else {
            2
        }
    }
}

/// Collects verdicts in completion order, emits them in rule order.
pub struct RunResultBuilder {
    target: TargetContext,
    started_at: DateTime<Utc>,
    rules: Vec<Arc<Rule>>,
    slots: Vec<Option<(Verdict, RuleState)>>,
    counts: VerdictCounts,
    cancelled: bool,
}

impl RunResultBuilder {
    pub fn new(target: TargetContext, rules: &[Arc<Rule>]) -> RunResultBuilder {
        RunResultBuilder {
            target,
            started_at: Utc::now(),
            rules: rules.to_vec(),
            slots: vec![None; rules.len()],
            counts: VerdictCounts::default(),
            cancelled: false,
        }
    }

    /// Stores the verdict for the rule at `index`. Returns `false` and keeps
    /// the first verdict when the slot is already filled, the index is out
    /// of range, the verdict belongs to another rule, or the state is not
    /// terminal.
    pub fn record(&mut self, index: usize, verdict: Verdict, state: RuleState) -> bool {
        let Some(rule) = self.rules.get(index) else {
            warn!("verdict for unknown rule index {} dropped", index);
            return false;
        };
        if rule.id != verdict.rule_id || !state.is_terminal() {
            warn!(
                "verdict for {} ({:?}) does not fit rule {}, dropped",
                verdict.rule_id, state, rule.id
            );
            return false;
        }
        if self.slots[index].is_some() {
            warn!("rule {} already has a verdict, keeping the first one", rule.id);
            return false;
        }

        self.counts.add(verdict.kind);
        self.slots[index] = Some((verdict, state));
        true
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Closes every rule still without a verdict as an errored, cancelled one.
    pub fn cancel_pending(&mut self, reason: &str) {
        self.cancelled = true;
        self.fail_pending(reason);
    }

    /// Closes every rule still without a verdict as errored; the run itself
    /// is not marked cancelled.
    pub fn fail_pending(&mut self, reason: &str) {
        let pending: Vec<usize> = (0..self.slots.len())
            .filter(|index| self.slots[*index].is_none())
            .collect();

        for index in pending {
            let verdict = Verdict::error(&self.rules[index].id, reason);
            self.record(index, verdict, RuleState::Errored);
        }
    }

    pub fn finish(mut self) -> RunResult {
        if self.pending() > 0 {
            self.fail_pending("run finished before the rule reached a verdict");
        }

        let outcomes = self
            .rules
            .into_iter()
            .zip(self.slots)
            .filter_map(|(rule, slot)| {
                slot.map(|(verdict, state)| RuleOutcome {
                    rule,
                    verdict,
                    state,
                })
            })
            .collect();

        RunResult {
            target: self.target,
            started_at: self.started_at,
            finished_at: Utc::now(),
            cancelled: self.cancelled,
            outcomes,
            counts: self.counts,
        }
    }
}
