use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::collectors::CollectorsRegistry;
use crate::evaluator;
use crate::results::{RuleState, RunResult, RunResultBuilder, Verdict, VerdictKind};
use crate::rules::{Rule, TargetContext};
use crate::ruleset::RuleSet;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub workers: usize,
    /// Applies to rules that do not set their own timeout.
    pub default_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            workers: std::thread::available_parallelism()
                .map(|workers| workers.get())
                .unwrap_or(1),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct Runner {
    registry: Arc<CollectorsRegistry>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(registry: Arc<CollectorsRegistry>, config: RunnerConfig) -> Runner {
        Runner { registry, config }
    }

    pub async fn run(&self, rule_set: &RuleSet, target: &TargetContext) -> RunResult {
        self.run_until(rule_set, target, std::future::pending()).await
    }

    /// Runs until every rule is done or `shutdown` resolves, whichever
    /// comes first.
    pub async fn run_until(
        &self,
        rule_set: &RuleSet,
        target: &TargetContext,
        shutdown: impl Future<Output = ()>,
    ) -> RunResult {
        info!(
            "running {} rules of {} against {} with {} workers",
            rule_set.len(),
            rule_set.name,
            target.identity(),
            self.config.workers
        );

        let mut builder = RunResultBuilder::new(target.clone(), rule_set.rules());
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let target = Arc::new(target.clone());
        let mut tasks = JoinSet::new();

        for (index, rule) in rule_set.rules().iter().enumerate() {
            let rule = rule.clone();
            let registry = self.registry.clone();
            let target = target.clone();
            let semaphore = semaphore.clone();
            let default_timeout = self.config.default_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let verdict = Verdict::error(&rule.id, "worker pool closed");
                    return (index, verdict, RuleState::Errored);
                };

                let execution = execute_rule(&registry, &rule, &target, default_timeout);
                match AssertUnwindSafe(execution).catch_unwind().await {
                    Ok((verdict, state)) => (index, verdict, state),
                    Err(_) => {
                        error!("rule {}: evaluation panicked", rule.id);
                        let verdict = Verdict::error(&rule.id, "rule evaluation panicked");
                        (index, verdict, RuleState::Errored)
                    }
                }
            });
        }

        tokio::pin!(shutdown);
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("run cancelled with {} rules pending", builder.pending());
                    tasks.abort_all();
                    cancelled = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, verdict, state))) => {
                        builder.record(index, verdict, state);
                    }
                    Some(Err(err)) => error!("rule task failed: {}", err),
                    None => break,
                },
            }
        }

        // tasks that finished before the abort still hand back their verdict
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, verdict, state)) = joined {
                builder.record(index, verdict, state);
            }
        }
        if cancelled {
            builder.cancel_pending("run cancelled before the rule completed");
        } else if builder.pending() > 0 {
            builder.fail_pending("rule task failed before reaching a verdict");
        }

        let result = builder.finish();
        let counts = result.counts();
        info!(
            "run finished: {} compliant, {} finding, {} not applicable, {} manual review, {} error",
            counts.compliant,
            counts.finding,
            counts.not_applicable,
            counts.manual_review,
            counts.error
        );
        result
    }
}

async fn execute_rule(
    registry: &CollectorsRegistry,
    rule: &Rule,
    target: &TargetContext,
    default_timeout: Duration,
) -> (Verdict, RuleState) {
    let mut state = RuleState::Pending;

    if !rule.applicability.is_satisfied_by(target) {
        advance(rule, &mut state, RuleState::Skipped);
        let verdict = Verdict::new(
            &rule.id,
            VerdictKind::NotApplicable,
            format!("rule does not apply to {}", target.identity()),
            serde_json::Value::Null,
        );
        return (verdict, state);
    }
    advance(rule, &mut state, RuleState::ApplicabilityChecked);

    let (Some(resource), Some(_)) = (&rule.resource, &rule.expectation) else {
        advance(rule, &mut state, RuleState::Recorded);
        return (evaluator::manual_review(rule), state);
    };

    let timeout = rule.timeout.unwrap_or(default_timeout);
    let fact = registry.collect(&rule.id, resource, timeout).await;
    advance(rule, &mut state, RuleState::Collected);

    let verdict = evaluator::evaluate(rule, &fact);
    advance(rule, &mut state, RuleState::Evaluated);

    let terminal = if verdict.is(VerdictKind::Error) {
        RuleState::Errored
    } else {
        RuleState::Recorded
    };
    advance(rule, &mut state, terminal);

    (verdict, state)
}

fn advance(rule: &Rule, state: &mut RuleState, next: RuleState) {
    debug!("rule {}: {:?} -> {:?}", rule.id, state, next);
    *state = next;
}
