//! Diagnostic tree recording what a query pipeline actually found.
//!
//! Every pipeline step contributes one node describing what it produced.
//! The tree reflects only the successful attempt's execution (or the final
//! failing attempt's partial path) — discarded retries never appear. Failure
//! messages embed the compact rendering; the structured tree also serializes
//! to JSON for reporters.

use serde::{Deserialize, Serialize};

/// One node in a diagnostic tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum Diagnostic {
    /// A single step: what it did and what it produced
    Simple {
        /// Step description, e.g. `find('.name')`
        description: String,
        /// Rendered value the step produced
        value: String,
    },
    /// An ordered chain of steps from one pipeline
    Path(Vec<Diagnostic>),
    /// Every branch result of a concat combinator
    Concat(Vec<Diagnostic>),
    /// Every attempted branch of a firstOf combinator
    FirstOf {
        /// Index of the winning branch, if any succeeded
        selected: Option<usize>,
        /// Outcome of every branch, in branch order
        attempts: Vec<BranchOutcome>,
    },
    /// Every attempted branch of a detect combinator, keyed by name
    Detect {
        /// Key of the winning branch, if any succeeded
        selected: Option<String>,
        /// Outcome of every branch, in declaration order
        attempts: Vec<KeyedOutcome>,
    },
    /// A failed assertion, terminating a path
    Error {
        /// The assertion's message
        message: String,
    },
}

/// The outcome of one combinator branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "camelCase")]
pub enum BranchOutcome {
    /// The branch succeeded, with its own diagnostic tree
    Success(Diagnostic),
    /// The branch failed, with the assertion message
    Failure(String),
}

/// A branch outcome labelled with its detect key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedOutcome {
    /// Branch name
    pub key: String,
    /// What the branch produced
    pub outcome: BranchOutcome,
}

impl Diagnostic {
    /// Create a simple step node
    #[must_use]
    pub fn simple(description: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Simple {
            description: description.into(),
            value: value.into(),
        }
    }

    /// Create an error node
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Render the tree to the compact one-line form used in failure messages
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Simple { description, value } => format!("{description} [{value}]"),
            Self::Path(nodes) => nodes
                .iter()
                .map(Self::render)
                .collect::<Vec<_>>()
                .join(" -> "),
            Self::Concat(nodes) => {
                let inner = nodes
                    .iter()
                    .map(Self::render)
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("concat({inner})")
            }
            Self::FirstOf { selected, attempts } => {
                let inner = attempts
                    .iter()
                    .enumerate()
                    .map(|(i, outcome)| {
                        let marker = if *selected == Some(i) { "*" } else { "" };
                        format!("{marker}{i}: {}", outcome.render())
                    })
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("firstOf({inner})")
            }
            Self::Detect { selected, attempts } => {
                let inner = attempts
                    .iter()
                    .map(|keyed| {
                        let marker = if selected.as_deref() == Some(keyed.key.as_str()) {
                            "*"
                        } else {
                            ""
                        };
                        format!("{marker}{}: {}", keyed.key, keyed.outcome.render())
                    })
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("detect({inner})")
            }
            Self::Error { message } => format!("error: {message}"),
        }
    }
}

impl BranchOutcome {
    fn render(&self) -> String {
        match self {
            Self::Success(diagnostic) => diagnostic.render(),
            Self::Failure(message) => format!("failed: {message}"),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod render_tests {
        use super::*;

        #[test]
        fn test_simple_node() {
            let node = Diagnostic::simple("find('.name')", "2 elements");
            assert_eq!(node.render(), "find('.name') [2 elements]");
        }

        #[test]
        fn test_path_chains_steps() {
            let node = Diagnostic::Path(vec![
                Diagnostic::simple("find('form')", "1 elements: <form/>"),
                Diagnostic::simple("find('.name')", "0 elements"),
            ]);
            assert_eq!(
                node.render(),
                "find('form') [1 elements: <form/>] -> find('.name') [0 elements]"
            );
        }

        #[test]
        fn test_first_of_marks_winner() {
            let node = Diagnostic::FirstOf {
                selected: Some(1),
                attempts: vec![
                    BranchOutcome::Failure("expected some elements".to_string()),
                    BranchOutcome::Success(Diagnostic::simple("find('a')", "1 elements")),
                ],
            };
            let rendered = node.render();
            assert!(rendered.contains("0: failed: expected some elements"));
            assert!(rendered.contains("*1: find('a')"));
        }

        #[test]
        fn test_detect_keys_branches() {
            let node = Diagnostic::Detect {
                selected: None,
                attempts: vec![KeyedOutcome {
                    key: "button".to_string(),
                    outcome: BranchOutcome::Failure("no elements".to_string()),
                }],
            };
            assert_eq!(node.render(), "detect(button: failed: no elements)");
        }

        #[test]
        fn test_error_node() {
            assert_eq!(
                Diagnostic::error("expected one element").render(),
                "error: expected one element"
            );
        }
    }

    mod serde_tests {
        use super::*;

        #[test]
        fn test_tree_round_trips_as_json() {
            let node = Diagnostic::Concat(vec![
                Diagnostic::simple("find('button')", "1 elements"),
                Diagnostic::error("no match"),
            ]);
            let json = serde_json::to_string(&node).expect("diagnostics serialize");
            let back: Diagnostic = serde_json::from_str(&json).expect("diagnostics deserialize");
            assert_eq!(back, node);
        }

        #[test]
        fn test_kind_tag_present() {
            let node = Diagnostic::simple("step", "value");
            let json = serde_json::to_value(&node).expect("serializes");
            assert_eq!(json["kind"], "simple");
        }
    }
}
