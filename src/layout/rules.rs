//! Material/product rule grammar and evaluation.
//!
//! Rules are evaluated in order against a named artifact set (name to
//! SHA-256 digest). `CREATE` accounts for expected outputs, `DISALLOW`
//! rejects anything still unaccounted for, and `MATCH` requires that
//! artifacts correspond, digest for digest, to the recorded materials or
//! products of an earlier step.

use globset::{Glob, GlobMatcher};
use indexmap::IndexMap;
use thiserror::Error;

/// Errors from rule parsing and evaluation.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("unparseable rule {rule:?}: {reason}")]
    Parse { rule: String, reason: String },

    #[error("{scope}: artifact {name:?} is disallowed by rule {pattern:?}")]
    Disallowed {
        scope: String,
        name: String,
        pattern: String,
    },

    #[error("{scope}: artifact {name:?} does not match step {step:?}: {reason}")]
    MatchFailed {
        scope: String,
        name: String,
        step: String,
        reason: String,
    },

    #[error("{scope}: rule references step {step:?}, which is not an earlier step")]
    UnknownStep { scope: String, step: String },
}

/// Which recorded artifact set of the source step a `MATCH` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSide {
    Materials,
    Products,
}

/// One parsed rule.
#[derive(Debug, Clone)]
pub enum Rule {
    Create(String),
    Disallow(String),
    Match {
        pattern: String,
        side: SourceSide,
        step: String,
    },
}

impl Rule {
    /// Parse a rule line.
    ///
    /// Grammar: `CREATE <pattern>`, `DISALLOW <pattern>`, or
    /// `MATCH <pattern> WITH {PRODUCTS|MATERIALS} FROM <step>`.
    pub fn parse(rule: &str) -> Result<Self, RuleError> {
        let tokens: Vec<&str> = rule.split_whitespace().collect();
        let fail = |reason: &str| RuleError::Parse {
            rule: rule.to_owned(),
            reason: reason.to_owned(),
        };

        match tokens.as_slice() {
            ["CREATE", pattern] => Ok(Rule::Create((*pattern).to_owned())),
            ["DISALLOW", pattern] => Ok(Rule::Disallow((*pattern).to_owned())),
            ["MATCH", pattern, "WITH", side, "FROM", step] => {
                let side = match *side {
                    "PRODUCTS" => SourceSide::Products,
                    "MATERIALS" => SourceSide::Materials,
                    other => {
                        return Err(fail(&format!(
                            "expected PRODUCTS or MATERIALS, got {:?}",
                            other
                        )))
                    }
                };
                Ok(Rule::Match {
                    pattern: (*pattern).to_owned(),
                    side,
                    step: (*step).to_owned(),
                })
            }
            _ => Err(fail("expected CREATE, DISALLOW, or MATCH form")),
        }
    }
}

/// Recorded artifact sets of the steps evaluated so far, keyed by step
/// name. Each entry holds (materials, products) as name-to-digest maps.
pub type StepArtifacts = IndexMap<String, (IndexMap<String, String>, IndexMap<String, String>)>;

/// Evaluate `rules` in order against `artifacts`.
///
/// `artifacts` maps artifact name to SHA-256 digest. Every rule consumes
/// from a shrinking "unaccounted" set; evaluation short-circuits at the
/// first `DISALLOW` hit or failed `MATCH`.
pub fn evaluate(
    scope: &str,
    rules: &[Rule],
    artifacts: &IndexMap<String, String>,
    sources: &StepArtifacts,
) -> Result<(), RuleError> {
    let mut remaining: Vec<&str> = artifacts.keys().map(String::as_str).collect();

    for rule in rules {
        match rule {
            Rule::Create(pattern) => {
                let matcher = compile(pattern)?;
                remaining.retain(|name| !matcher.is_match(name));
            }
            Rule::Disallow(pattern) => {
                let matcher = compile(pattern)?;
                if let Some(name) = remaining.iter().find(|name| matcher.is_match(name)) {
                    return Err(RuleError::Disallowed {
                        scope: scope.to_owned(),
                        name: (*name).to_owned(),
                        pattern: pattern.clone(),
                    });
                }
            }
            Rule::Match {
                pattern,
                side,
                step,
            } => {
                let matcher = compile(pattern)?;
                let (materials, products) =
                    sources.get(step).ok_or_else(|| RuleError::UnknownStep {
                        scope: scope.to_owned(),
                        step: step.clone(),
                    })?;
                let source = match side {
                    SourceSide::Materials => materials,
                    SourceSide::Products => products,
                };

                let mut matched = Vec::new();
                for name in &remaining {
                    if !matcher.is_match(name) {
                        continue;
                    }
                    let recorded =
                        source
                            .get(*name)
                            .ok_or_else(|| RuleError::MatchFailed {
                                scope: scope.to_owned(),
                                name: (*name).to_owned(),
                                step: step.clone(),
                                reason: "not recorded by the source step".to_owned(),
                            })?;
                    let actual = &artifacts[*name];
                    if recorded != actual {
                        return Err(RuleError::MatchFailed {
                            scope: scope.to_owned(),
                            name: (*name).to_owned(),
                            step: step.clone(),
                            reason: format!(
                                "digest {} does not match recorded {}",
                                actual, recorded
                            ),
                        });
                    }
                    matched.push(*name);
                }
                remaining.retain(|name| !matched.contains(name));
            }
        }
    }

    Ok(())
}

fn compile(pattern: &str) -> Result<GlobMatcher, RuleError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| RuleError::Parse {
            rule: pattern.to_owned(),
            reason: e.to_string(),
        })
}
