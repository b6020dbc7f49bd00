//! Combinators running multiple sub-queries against one shared scope.
//!
//! Branches are closures extending a scoped child query. All combinators run
//! every branch to completion in declaration order — FirstOf and Detect do
//! not short-circuit on the first success, so the diagnostic tree always
//! records what *every* strategy found. "Racing" is semantic: the first
//! logical success wins, not the first temporal one.

use std::collections::HashSet;
use std::sync::Arc;

use crate::diagnostic::{BranchOutcome, Diagnostic, KeyedOutcome};
use crate::query::{Query, QueryValue, Step};
use crate::result::BuscarError;

/// A combinator branch: extends a scoped child query
pub type Branch = Arc<dyn Fn(Query) -> Query + Send + Sync>;

/// Wrap a closure as a [`Branch`]
#[must_use]
pub fn branch(f: impl Fn(Query) -> Query + Send + Sync + 'static) -> Branch {
    Arc::new(f)
}

impl Query {
    /// Union of every branch's results against the current scope.
    ///
    /// Each branch's full pipeline executes to completion — its own
    /// assertions fire independently and any failure propagates. The merged
    /// collection is de-duplicated by element identity, preserving
    /// first-seen order across branches.
    #[must_use]
    pub fn concat(&self, branches: Vec<Branch>) -> Self {
        self.transform("concat", move |ctx, value| {
            let elements = value.into_elements()?;
            let mut seen = HashSet::new();
            let mut merged = Vec::new();
            let mut nodes = Vec::new();
            for branch in &branches {
                let child = branch(ctx.scoped(elements.clone()));
                let resolution = child.execute()?;
                nodes.push(resolution.diagnostic);
                for element in resolution.value.into_elements()? {
                    if seen.insert(element) {
                        merged.push(element);
                    }
                }
            }
            Ok(Step {
                value: QueryValue::Elements(merged),
                node: Diagnostic::Concat(nodes),
            })
        })
    }

    /// The first branch that succeeds wins; every branch still runs.
    ///
    /// If every branch fails its assertion, the aggregate error has the
    /// fixed message `all queries failed in firstOf` and a diagnostic
    /// holding each branch's outcome.
    ///
    /// # Panics
    ///
    /// Panics immediately if any branch builds a query with no expectation
    /// or action — such a branch could never fail, which defeats the
    /// combinator; this is static misuse, not a retryable state.
    #[must_use]
    pub fn first_of(&self, branches: Vec<Branch>) -> Self {
        for (i, branch) in branches.iter().enumerate() {
            let probe = branch(self.context().scoped(Vec::new()));
            assert!(
                probe.carries_expectation(),
                "branch {i} passed to firstOf carries no expectation or action"
            );
        }
        self.transform("firstOf", move |ctx, value| {
            let elements = value.into_elements()?;
            let mut attempts = Vec::new();
            let mut winner: Option<(usize, QueryValue)> = None;
            for (i, branch) in branches.iter().enumerate() {
                let child = branch(ctx.scoped(elements.clone()));
                match child.execute() {
                    Ok(resolution) => {
                        attempts.push(BranchOutcome::Success(resolution.diagnostic));
                        if winner.is_none() {
                            winner = Some((i, resolution.value));
                        }
                    }
                    Err(error) if error.is_assertion() => {
                        attempts.push(BranchOutcome::Failure(error.message().to_string()));
                    }
                    Err(error) => return Err(error),
                }
            }
            match winner {
                Some((selected, value)) => Ok(Step {
                    value,
                    node: Diagnostic::FirstOf {
                        selected: Some(selected),
                        attempts,
                    },
                }),
                None => Err(BuscarError::assertion(
                    "all queries failed in firstOf",
                    Diagnostic::FirstOf {
                        selected: None,
                        attempts,
                    },
                )),
            }
        })
        .marked()
    }

    /// FirstOf keyed by name: the value is the winning branch's key plus its
    /// result, as [`QueryValue::Detected`].
    ///
    /// Aggregate failure has the fixed message `all queries failed in
    /// detect`, with the diagnostic keyed by branch name.
    ///
    /// # Panics
    ///
    /// Panics immediately if any branch builds a query with no expectation
    /// or action, as for [`Query::first_of`].
    #[must_use]
    pub fn detect<S: Into<String>>(&self, branches: Vec<(S, Branch)>) -> Self {
        let branches: Vec<(String, Branch)> = branches
            .into_iter()
            .map(|(key, branch)| (key.into(), branch))
            .collect();
        for (key, branch) in &branches {
            let probe = branch(self.context().scoped(Vec::new()));
            assert!(
                probe.carries_expectation(),
                "branch '{key}' passed to detect carries no expectation or action"
            );
        }
        self.transform("detect", move |ctx, value| {
            let elements = value.into_elements()?;
            let mut attempts = Vec::new();
            let mut winner: Option<(String, QueryValue)> = None;
            for (key, branch) in &branches {
                let child = branch(ctx.scoped(elements.clone()));
                match child.execute() {
                    Ok(resolution) => {
                        attempts.push(KeyedOutcome {
                            key: key.clone(),
                            outcome: BranchOutcome::Success(resolution.diagnostic),
                        });
                        if winner.is_none() {
                            winner = Some((key.clone(), resolution.value));
                        }
                    }
                    Err(error) if error.is_assertion() => {
                        attempts.push(KeyedOutcome {
                            key: key.clone(),
                            outcome: BranchOutcome::Failure(error.message().to_string()),
                        });
                    }
                    Err(error) => return Err(error),
                }
            }
            match winner {
                Some((key, value)) => Ok(Step {
                    node: Diagnostic::Detect {
                        selected: Some(key.clone()),
                        attempts,
                    },
                    value: QueryValue::Detected {
                        key,
                        value: Box::new(value),
                    },
                }),
                None => Err(BuscarError::assertion(
                    "all queries failed in detect",
                    Diagnostic::Detect {
                        selected: None,
                        attempts,
                    },
                )),
            }
        })
        .marked()
    }
}
