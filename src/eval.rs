use itertools::Itertools;
use log::{debug, warn};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::bucket::{bucket, BUCKET_COUNT};
use crate::config::EvaluatorConfig;
use crate::context::EvaluationContext;
use crate::flag::{Environment, FlagRecord};
use crate::rule::{RuleKind, RuleNode, RuleShape};
use crate::trace::{Step, Trace};

/// A record of one rule node being evaluated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleVisit {
    /// The [FlagRecord::key] of the flag being evaluated.
    pub flag_key: String,
    /// Nesting depth of the node; the root rule is at depth 0.
    pub depth: usize,
    pub kind: RuleKind,
    pub matched: bool,
}

/// Trait used by [Evaluator::evaluate] to report every rule node it evaluates.
///
/// Children skipped by short-circuiting are never reported. A composite node is reported
/// after its children.
pub trait RuleVisitRecorder {
    /// Record the evaluation of a single rule node.
    fn record(&self, visit: RuleVisit);
}

/// Evaluate a feature flag for the specified [EvaluationContext] with the default
/// [EvaluatorConfig].
///
/// See [Evaluator::evaluate].
pub fn evaluate(record: &FlagRecord, context: &EvaluationContext) -> Decision {
    Evaluator::default().evaluate(record, context, None)
}

/// Evaluates flags against contexts under a fixed [EvaluatorConfig].
///
/// An evaluator holds no state besides its configuration and can be shared freely between
/// threads.
#[derive(Clone, Debug, Default)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Check that a flag's rule tree fits within the configured limits, without evaluating it.
    ///
    /// Management surfaces can call this when a flag is saved to refuse trees that would
    /// only ever evaluate to an error.
    pub fn check(&self, record: &FlagRecord) -> Result<RuleShape, Error> {
        let shape = record.rule.shape();
        self.config.limits.check(shape)?;
        Ok(shape)
    }

    /// Decide whether `record` is on for `context`.
    ///
    /// A disabled flag is off for everyone and its rules are not looked at. Otherwise the rule
    /// tree is measured against the configured limits and then walked, with `And` and `Or`
    /// stopping at the first child that settles their outcome. Malformed rules never abort
    /// the walk; they count as not matched and say so in the trace.
    ///
    /// This never fails: problems that prevent evaluation altogether (an oversized rule tree,
    /// or an environment mismatch when [EvaluatorConfig::enforce_environment] is set) produce
    /// a disabled [Decision] whose reason is [Reason::Error].
    pub fn evaluate(
        &self,
        record: &FlagRecord,
        context: &EvaluationContext,
        recorder: Option<&dyn RuleVisitRecorder>,
    ) -> Decision {
        if !record.enabled {
            return Decision::off(context);
        }

        if self.config.enforce_environment {
            if let Err(error) = check_environment(record, context) {
                warn!("not evaluating flag {}: {}", record.key, error);
                return Decision::rejected(error, context);
            }
        }

        let mut trace = Trace::new();
        trace.push(0, Step::FlagOn);

        match self.walk(&record.rule, context, &record.key, recorder, &mut trace) {
            Ok(matched) => Decision {
                enabled: matched,
                reason: if matched {
                    Reason::RuleMatch
                } else {
                    Reason::RuleMiss
                },
                trace,
                service: context.service().map(str::to_string),
            },
            Err(error) => {
                warn!("not evaluating flag {}: {}", record.key, error);
                Decision::rejected(error, context)
            }
        }
    }

    /// Evaluate a rule tree on its own, using `flag_key` for percentage bucketing.
    ///
    /// A tree that exceeds the configured limits is not walked; the outcome is unmatched and
    /// the trace holds a single [Step::Rejected].
    pub fn evaluate_rule(
        &self,
        rule: &RuleNode,
        context: &EvaluationContext,
        flag_key: &str,
    ) -> RuleOutcome {
        let mut trace = Trace::new();
        match self.walk(rule, context, flag_key, None, &mut trace) {
            Ok(matched) => RuleOutcome { matched, trace },
            Err(error) => RuleOutcome {
                matched: false,
                trace: Trace::single(Step::Rejected { error }),
            },
        }
    }

    fn walk(
        &self,
        rule: &RuleNode,
        context: &EvaluationContext,
        flag_key: &str,
        recorder: Option<&dyn RuleVisitRecorder>,
        trace: &mut Trace,
    ) -> Result<bool, Error> {
        self.config.limits.check(rule.shape())?;

        if context.subject_id().is_empty() {
            debug!("evaluating flag {} for an empty subject id", flag_key);
        }

        let mut walk = RuleWalk {
            flag_key,
            subject_id: context.subject_id(),
            recorder,
            trace,
        };
        Ok(walk.evaluate(rule, 0))
    }
}

fn check_environment(record: &FlagRecord, context: &EvaluationContext) -> Result<(), Error> {
    match context.environment().parse::<Environment>() {
        Ok(environment) if environment == record.environment => Ok(()),
        _ => Err(Error::EnvironmentMismatch {
            expected: record.environment,
            actual: context.environment().to_string(),
        }),
    }
}

// State for a single walk over a rule tree. The tree has already been checked against the
// configured limits, so recursion depth is bounded.
struct RuleWalk<'a> {
    flag_key: &'a str,
    subject_id: &'a str,
    recorder: Option<&'a dyn RuleVisitRecorder>,
    trace: &'a mut Trace,
}

impl RuleWalk<'_> {
    fn evaluate(&mut self, rule: &RuleNode, depth: usize) -> bool {
        let matched = match rule {
            RuleNode::Percentage { value } => match valid_threshold(*value) {
                Some(threshold) => {
                    let bucket = bucket(self.subject_id, self.flag_key);
                    let matched = bucket < threshold;
                    self.trace.push(
                        depth,
                        Step::Percentage {
                            bucket,
                            threshold,
                            matched,
                        },
                    );
                    matched
                }
                None => self.invalid(depth, RuleKind::Percentage),
            },
            RuleNode::Allowlist { user_ids } if user_ids.is_empty() => {
                self.invalid(depth, RuleKind::Allowlist)
            }
            RuleNode::Allowlist { user_ids } => {
                let matched = user_ids.contains(self.subject_id);
                self.trace.push(
                    depth,
                    Step::Allowlist {
                        size: user_ids.len(),
                        matched,
                    },
                );
                matched
            }
            RuleNode::And { rules } if rules.is_empty() => self.invalid(depth, RuleKind::And),
            RuleNode::And { rules } => self.evaluate_all(rules, depth),
            RuleNode::Or { rules } if rules.is_empty() => self.invalid(depth, RuleKind::Or),
            RuleNode::Or { rules } => self.evaluate_any(rules, depth),
            RuleNode::Unknown => {
                self.trace.push(depth, Step::UnknownRule);
                false
            }
        };

        if let Some(recorder) = self.recorder {
            recorder.record(RuleVisit {
                flag_key: self.flag_key.to_string(),
                depth,
                kind: rule.kind(),
                matched,
            });
        }

        matched
    }

    fn evaluate_all(&mut self, rules: &[RuleNode], depth: usize) -> bool {
        let total = rules.len();
        let slot = self.trace.push(
            depth,
            Step::And {
                matched: false,
                evaluated: 0,
                total,
                decided_by: None,
            },
        );

        // stops at the first child that does not match
        let failed = rules
            .iter()
            .find_position(|rule| !self.evaluate(rule, depth + 1))
            .map(|(index, _)| index);
        let evaluated = failed.map_or(total, |index| index + 1);
        let matched = failed.is_none();

        self.trace.set(
            slot,
            Step::And {
                matched,
                evaluated,
                total,
                decided_by: failed,
            },
        );
        matched
    }

    fn evaluate_any(&mut self, rules: &[RuleNode], depth: usize) -> bool {
        let total = rules.len();
        let slot = self.trace.push(
            depth,
            Step::Or {
                matched: false,
                evaluated: 0,
                total,
                decided_by: None,
            },
        );

        // stops at the first child that matches
        let hit = rules
            .iter()
            .find_position(|rule| self.evaluate(rule, depth + 1))
            .map(|(index, _)| index);
        let evaluated = hit.map_or(total, |index| index + 1);
        let matched = hit.is_some();

        self.trace.set(
            slot,
            Step::Or {
                matched,
                evaluated,
                total,
                decided_by: hit,
            },
        );
        matched
    }

    fn invalid(&mut self, depth: usize, kind: RuleKind) -> bool {
        self.trace.push(depth, Step::Invalid { kind });
        false
    }
}

fn valid_threshold(value: Option<i64>) -> Option<u8> {
    value
        .filter(|v| (0..=i64::from(BUCKET_COUNT)).contains(v))
        .and_then(|v| u8::try_from(v).ok())
}

/// The outcome of [Evaluator::evaluate_rule].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleOutcome {
    pub matched: bool,
    pub trace: Trace,
}

/// The result of [evaluate]: whether the flag is on, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub enabled: bool,

    /// The main factor behind the decision.
    pub reason: Reason,

    /// Every step the evaluator took, in order.
    pub trace: Trace,

    /// The [EvaluationContext] service, carried through for logging and auditing.
    pub service: Option<String>,
}

impl Decision {
    fn off(context: &EvaluationContext) -> Self {
        Decision {
            enabled: false,
            reason: Reason::Off,
            trace: Trace::single(Step::FlagOff),
            service: context.service().map(str::to_string),
        }
    }

    fn rejected(error: Error, context: &EvaluationContext) -> Self {
        Decision {
            enabled: false,
            reason: Reason::Error {
                error: error.clone(),
            },
            trace: Trace::single(Step::Rejected { error }),
            service: context.service().map(str::to_string),
        }
    }

    /// Human-readable explanation of the decision, one trace step per line.
    pub fn reason_text(&self) -> String {
        self.trace.to_string()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.reason, Reason::Error { .. })
    }
}

// Serialized form keeps a plain `reason` string for consumers that predate the trace.
impl Serialize for Decision {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct DecisionRepr<'a> {
            enabled: bool,
            reason: String,
            #[serde(flatten)]
            kind: &'a Reason,
            trace: &'a Trace,
            #[serde(skip_serializing_if = "Option::is_none")]
            service: Option<&'a str>,
        }

        DecisionRepr {
            enabled: self.enabled,
            reason: self.reason_text(),
            kind: &self.reason,
            trace: &self.trace,
            service: self.service.as_deref(),
        }
        .serialize(serializer)
    }
}

/// Reason describes the main factor behind a [Decision].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum Reason {
    /// Off indicates that the flag's master switch was off.
    Off,
    /// RuleMatch indicates that the flag was on and its rule tree matched the context.
    RuleMatch,
    /// RuleMiss indicates that the flag was on but its rule tree did not match the context.
    RuleMiss,
    /// Error indicates that the flag could not be evaluated; the decision is disabled.
    Error {
        #[serde(rename = "errorKind")]
        error: Error,
    },
}

/// Error is returned via a [Reason::Error] when a flag could not be evaluated at all.
///
/// Malformed rules are not errors; they only make their own branch of the tree fail.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "code")]
pub enum Error {
    /// The rule tree is nested more deeply than [crate::RuleLimits::max_depth] allows.
    #[error("rule tree too deep: depth {depth} exceeds the limit of {limit}")]
    RuleTreeTooDeep { depth: usize, limit: usize },
    /// The rule tree has more nodes than [crate::RuleLimits::max_nodes] allows.
    #[error("rule tree too large: {nodes} rules exceed the limit of {limit}")]
    RuleTreeTooLarge { nodes: usize, limit: usize },
    /// The context's environment does not name the flag's environment. Only reported when
    /// [EvaluatorConfig::enforce_environment] is set.
    #[error("context environment {actual:?} does not match flag environment {expected}")]
    EnvironmentMismatch {
        expected: Environment,
        actual: String,
    },
}
