mod run_result;
mod verdict;

pub use run_result::{RuleOutcome, RuleState, RunResult, RunResultBuilder, VerdictCounts};
pub use verdict::{Verdict, VerdictKind};
