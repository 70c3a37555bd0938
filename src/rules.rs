mod applicability;
mod expectation;
mod rule;

pub use applicability::{Applicability, TargetContext};
pub use expectation::{Expectation, MembershipMode, ThresholdOperator};
pub use rule::{ResourceReference, Rule, Severity};
