use std::fmt;

use itertools::Itertools;
use serde::Serialize;

use crate::eval::Error;
use crate::rule::RuleKind;

/// What the evaluator concluded at one point of the walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum Step {
    /// The flag's master switch is off; no rules were looked at.
    FlagOff,
    /// The flag's master switch is on; the rule tree follows.
    FlagOn,
    /// The flag could not be evaluated at all.
    Rejected { error: Error },
    Percentage {
        bucket: u8,
        threshold: u8,
        matched: bool,
    },
    Allowlist {
        size: usize,
        matched: bool,
    },
    /// A conjunction. `decided_by` is the index of the child that failed, if any.
    #[serde(rename_all = "camelCase")]
    And {
        matched: bool,
        evaluated: usize,
        total: usize,
        decided_by: Option<usize>,
    },
    /// A disjunction. `decided_by` is the index of the child that matched, if any.
    #[serde(rename_all = "camelCase")]
    Or {
        matched: bool,
        evaluated: usize,
        total: usize,
        decided_by: Option<usize>,
    },
    /// A rule of a known type with missing or out-of-range data.
    Invalid { kind: RuleKind },
    UnknownRule,
}

impl Step {
    /// Whether this step stands for a rule that matched. Steps that are not rule outcomes
    /// report `false`.
    pub fn matched(&self) -> bool {
        match self {
            Step::Percentage { matched, .. }
            | Step::Allowlist { matched, .. }
            | Step::And { matched, .. }
            | Step::Or { matched, .. } => *matched,
            _ => false,
        }
    }

    /// The rule kind this step describes, or `None` for flag-level steps.
    pub fn rule_kind(&self) -> Option<RuleKind> {
        match self {
            Step::FlagOff | Step::FlagOn | Step::Rejected { .. } => None,
            Step::Percentage { .. } => Some(RuleKind::Percentage),
            Step::Allowlist { .. } => Some(RuleKind::Allowlist),
            Step::And { .. } => Some(RuleKind::And),
            Step::Or { .. } => Some(RuleKind::Or),
            Step::Invalid { kind } => Some(*kind),
            Step::UnknownRule => Some(RuleKind::Unknown),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::FlagOff => write!(f, "flag globally disabled"),
            Step::FlagOn => write!(f, "flag enabled, evaluating rules"),
            Step::Rejected { error } => write!(f, "flag not evaluated: {}", error),
            Step::Percentage {
                bucket,
                threshold,
                matched,
            } => {
                let cmp = if *matched { "<" } else { ">=" };
                write!(f, "subject bucket {} {} {}%", bucket, cmp, threshold)
            }
            Step::Allowlist { size, matched } => {
                let verdict = if *matched { "in" } else { "not in" };
                let noun = if *size == 1 { "entry" } else { "entries" };
                write!(f, "subject {} allowlist ({} {})", verdict, size, noun)
            }
            Step::And {
                matched,
                evaluated,
                total,
                decided_by,
            } => match decided_by {
                Some(index) if !matched => write!(
                    f,
                    "AND failed at rule {} ({} of {} evaluated)",
                    index, evaluated, total
                ),
                _ => write!(f, "all {} AND conditions met", total),
            },
            Step::Or {
                matched,
                evaluated,
                total,
                decided_by,
            } => match decided_by {
                Some(index) if *matched => write!(
                    f,
                    "OR matched at rule {} ({} of {} evaluated)",
                    index, evaluated, total
                ),
                _ => write!(f, "none of {} OR conditions met", total),
            },
            Step::Invalid { kind } => write!(f, "invalid {} rule", kind),
            Step::UnknownRule => write!(f, "unknown rule type"),
        }
    }
}

/// One entry of a [Trace]: a [Step] and how deeply nested the rule it describes is.
/// Flag-level steps and the root rule sit at depth 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub depth: usize,
    #[serde(flatten)]
    pub step: Step,
}

/// Ordered record of every decision made while evaluating a flag.
///
/// Steps appear in visiting order, with a composite rule's step ahead of its children's.
/// Children skipped by short-circuiting have no steps. Evaluating the same flag and context
/// again produces an equal trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    steps: Vec<TraceStep>,
}

impl Trace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn single(step: Step) -> Self {
        Self {
            steps: vec![TraceStep { depth: 0, step }],
        }
    }

    pub(crate) fn push(&mut self, depth: usize, step: Step) -> usize {
        self.steps.push(TraceStep { depth, step });
        self.steps.len() - 1
    }

    /// Overwrite a step reserved earlier with [Trace::push], once its outcome is known.
    pub(crate) fn set(&mut self, index: usize, step: Step) {
        if let Some(entry) = self.steps.get_mut(index) {
            entry.step = step;
        }
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of rule nodes that were actually evaluated.
    pub fn rules_evaluated(&self) -> usize {
        self.steps
            .iter()
            .filter(|entry| entry.step.rule_kind().is_some())
            .count()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self
            .steps
            .iter()
            .map(|entry| format!("{}{}", "  ".repeat(entry.depth), entry.step))
            .join("\n");
        f.write_str(&lines)
    }
}
