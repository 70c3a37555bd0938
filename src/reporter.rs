use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::results::{RunResult, VerdictCounts, VerdictKind};
use crate::rules::Severity;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("writing report: {0}")]
    Io(#[from] std::io::Error),
    #[error("serializing report: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub counts: VerdictCounts,
    pub by_severity: BTreeMap<Severity, VerdictCounts>,
    /// `compliant / (compliant + finding)`; `None` when nothing was decided.
    pub pass_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub target: String,
    pub timestamp: String,
    pub results: Vec<ResultEntry>,
    pub summary: SummaryDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub id: String,
    pub severity: Severity,
    pub verdict: VerdictKind,
    pub finding_details: String,
    pub evidence: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDocument {
    pub compliant: usize,
    pub finding: usize,
    pub not_applicable: usize,
    pub manual_review: usize,
    pub error: usize,
    pub pass_rate: Option<f64>,
}

impl SummaryDocument {
    pub fn counts(&self) -> VerdictCounts {
        VerdictCounts {
            compliant: self.compliant,
            finding: self.finding,
            not_applicable: self.not_applicable,
            manual_review: self.manual_review,
            error: self.error,
        }
    }
}

impl From<VerdictCounts> for SummaryDocument {
    fn from(counts: VerdictCounts) -> Self {
        SummaryDocument {
            compliant: counts.compliant,
            finding: counts.finding,
            not_applicable: counts.not_applicable,
            manual_review: counts.manual_review,
            error: counts.error,
            pass_rate: counts.pass_rate(),
        }
    }
}

pub struct Reporter;

impl Reporter {
    pub fn summarize(run_result: &RunResult) -> Summary {
        let mut by_severity: BTreeMap<Severity, VerdictCounts> = BTreeMap::new();
        for outcome in run_result.outcomes() {
            by_severity
                .entry(outcome.rule.severity)
                .or_default()
                .add(outcome.verdict.kind);
        }

        let counts = run_result.counts();
        Summary {
            counts,
            by_severity,
            pass_rate: counts.pass_rate(),
        }
    }

    pub fn document(run_result: &RunResult) -> ResultDocument {
        let results = run_result
            .outcomes()
            .iter()
            .map(|outcome| ResultEntry {
                id: outcome.rule.id.clone(),
                severity: outcome.rule.severity,
                verdict: outcome.verdict.kind,
                finding_details: outcome.verdict.finding_details.clone(),
                evidence: outcome.verdict.evidence.clone(),
            })
            .collect();

        ResultDocument {
            target: run_result.target.identity(),
            timestamp: timestamp(run_result.finished_at),
            results,
            summary: run_result.counts().into(),
        }
    }

    /// Writes the run as one pretty-printed JSON document.
    pub fn emit<W: Write>(run_result: &RunResult, mut sink: W) -> Result<(), ReportError> {
        serde_json::to_writer_pretty(&mut sink, &Reporter::document(run_result))?;
        writeln!(sink)?;
        sink.flush()?;
        Ok(())
    }

    pub fn parse(source: &str) -> Result<ResultDocument, ReportError> {
        Ok(serde_json::from_str(source)?)
    }

    /// One line per rule followed by the summary, for terminals.
    pub fn emit_text<W: Write>(run_result: &RunResult, mut sink: W) -> Result<(), ReportError> {
        writeln!(
            sink,
            "{} {}",
            "Target:".bold(),
            run_result.target.identity()
        )?;

        for outcome in run_result.outcomes() {
            writeln!(
                sink,
                "  {:<15} {:<10} {:<8} {}",
                paint(outcome.verdict.kind),
                outcome.rule.id,
                outcome.rule.severity.to_cat(),
                outcome.rule.title
            )?;
            if !outcome.verdict.finding_details.is_empty()
                && !outcome.verdict.is(VerdictKind::Compliant)
            {
                writeln!(sink, "  {:<15} {}", "", outcome.verdict.finding_details.dimmed())?;
            }
        }

        let summary = Reporter::summarize(run_result);
        writeln!(sink)?;
        for kind in VerdictKind::ALL {
            writeln!(sink, "  {:<15} {}", paint(kind), summary.counts.get(kind))?;
        }
        let pass_rate = match summary.pass_rate {
            Some(rate) => format!("{:.1}%", rate * 100.0),
            None => "n/a".to_owned(),
        };
        writeln!(sink, "  {:<15} {}", "pass rate".bold(), pass_rate)?;
        if run_result.cancelled {
            writeln!(sink, "  {}", "run was cancelled, results are partial".yellow())?;
        }

        sink.flush()?;
        Ok(())
    }
}

fn paint(kind: VerdictKind) -> ColoredString {
    match kind {
        VerdictKind::Compliant => kind.as_str().green(),
        VerdictKind::Finding => kind.as_str().red().bold(),
        VerdictKind::NotApplicable => kind.as_str().normal(),
        VerdictKind::ManualReview => kind.as_str().yellow(),
        VerdictKind::Error => kind.as_str().magenta(),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
