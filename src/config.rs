use serde::{Deserialize, Serialize};

use crate::eval::Error;
use crate::rule::RuleShape;

pub const DEFAULT_MAX_RULE_DEPTH: usize = 32;
pub const DEFAULT_MAX_RULE_NODES: usize = 1024;

/// Upper bounds on the size of a rule tree the evaluator will walk.
///
/// Trees are measured before evaluation starts; anything over either bound is rejected with
/// [Error::RuleTreeTooDeep] or [Error::RuleTreeTooLarge] instead of being walked.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for RuleLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_RULE_DEPTH,
            max_nodes: DEFAULT_MAX_RULE_NODES,
        }
    }
}

impl RuleLimits {
    /// Check a measured tree against these limits. Depth is checked first.
    pub fn check(&self, shape: RuleShape) -> Result<(), Error> {
        if shape.depth > self.max_depth {
            return Err(Error::RuleTreeTooDeep {
                depth: shape.depth,
                limit: self.max_depth,
            });
        }
        if shape.nodes > self.max_nodes {
            return Err(Error::RuleTreeTooLarge {
                nodes: shape.nodes,
                limit: self.max_nodes,
            });
        }
        Ok(())
    }
}

/// Settings for an [crate::Evaluator].
///
/// Host applications typically embed this in their own configuration file; every field is
/// optional there and falls back to its default.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvaluatorConfig {
    pub limits: RuleLimits,

    /// Require the context's environment to name the flag's environment.
    ///
    /// Off by default: scoping a flag to the right tenant and environment is the caller's
    /// job, and the evaluator does not second-guess the record it is given.
    pub enforce_environment: bool,
}
