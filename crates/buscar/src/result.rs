//! Result and error types for Buscar.

use thiserror::Error;

use crate::diagnostic::Diagnostic;

/// Result type for Buscar operations
pub type BuscarResult<T> = Result<T, BuscarError>;

/// Errors that can occur while resolving a query.
///
/// Assertion failures are the only retried kind: the scheduler polls a query
/// until an attempt stops returning [`BuscarError::AssertionFailed`] or the
/// timeout expires. Usage and DOM errors pass through the scheduler
/// unretried.
#[derive(Debug, Error)]
pub enum BuscarError {
    /// An expectation, cardinality check, or model mismatch failed
    #[error("{message} (found: {found})")]
    AssertionFailed {
        /// What was expected
        message: String,
        /// Rendered diagnostic tree of the failing attempt
        found: String,
        /// Diagnostic tree of the failing attempt
        diagnostic: Diagnostic,
        /// Expected value, when a rich diff is available
        expected: Option<serde_json::Value>,
        /// Actual value, when a rich diff is available
        actual: Option<serde_json::Value>,
    },

    /// The query API was misused; never retried
    #[error("invalid query usage: {message}")]
    Usage {
        /// What was wrong with the call
        message: String,
    },

    /// The injected DOM capability failed; never retried
    #[error("DOM operation failed: {message}")]
    Dom {
        /// Error message from the capability
        message: String,
    },
}

impl BuscarError {
    /// Create an assertion failure carrying a diagnostic tree
    #[must_use]
    pub fn assertion(message: impl Into<String>, diagnostic: Diagnostic) -> Self {
        let found = diagnostic.render();
        Self::AssertionFailed {
            message: message.into(),
            found,
            diagnostic,
            expected: None,
            actual: None,
        }
    }

    /// Create an assertion failure with expected/actual payloads for diffs
    #[must_use]
    pub fn assertion_diff(
        message: impl Into<String>,
        diagnostic: Diagnostic,
        expected: serde_json::Value,
        actual: serde_json::Value,
    ) -> Self {
        let found = diagnostic.render();
        Self::AssertionFailed {
            message: message.into(),
            found,
            diagnostic,
            expected: Some(expected),
            actual: Some(actual),
        }
    }

    /// Create a usage error
    #[must_use]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a DOM capability error
    #[must_use]
    pub fn dom(message: impl Into<String>) -> Self {
        Self::Dom {
            message: message.into(),
        }
    }

    /// Whether this error is a retryable assertion failure
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self, Self::AssertionFailed { .. })
    }

    /// The assertion message without the rendered diagnostic suffix
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::AssertionFailed { message, .. }
            | Self::Usage { message }
            | Self::Dom { message } => message,
        }
    }

    /// The diagnostic tree attached to an assertion failure
    #[must_use]
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::AssertionFailed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }

    /// Attach the partial execution path of the failing pipeline.
    ///
    /// The error's own diagnostic becomes the final node of the path, so the
    /// rendered tree shows every step that succeeded before the failure.
    #[must_use]
    pub(crate) fn with_trail(self, mut trail: Vec<Diagnostic>) -> Self {
        match self {
            Self::AssertionFailed {
                message,
                diagnostic,
                expected,
                actual,
                ..
            } => {
                trail.push(diagnostic);
                let diagnostic = Diagnostic::Path(trail);
                let found = diagnostic.render();
                Self::AssertionFailed {
                    message,
                    found,
                    diagnostic,
                    expected,
                    actual,
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod classification_tests {
        use super::*;

        #[test]
        fn test_assertion_is_retryable() {
            let err = BuscarError::assertion("expected one element", Diagnostic::error("none"));
            assert!(err.is_assertion());
        }

        #[test]
        fn test_usage_is_not_retryable() {
            let err = BuscarError::usage("missing expectation");
            assert!(!err.is_assertion());
        }

        #[test]
        fn test_dom_is_not_retryable() {
            let err = BuscarError::dom("click failed");
            assert!(!err.is_assertion());
        }
    }

    mod rendering_tests {
        use super::*;

        #[test]
        fn test_assertion_message_includes_found() {
            let err = BuscarError::assertion(
                "expected one element",
                Diagnostic::simple("find('.name')", "0 elements"),
            );
            let rendered = err.to_string();
            assert!(rendered.starts_with("expected one element (found: "));
            assert!(rendered.contains("find('.name')"));
        }

        #[test]
        fn test_message_excludes_diagnostic() {
            let err = BuscarError::assertion("expected one element", Diagnostic::error("x"));
            assert_eq!(err.message(), "expected one element");
        }

        #[test]
        fn test_with_trail_prepends_path() {
            let err = BuscarError::assertion("boom", Diagnostic::error("boom"))
                .with_trail(vec![Diagnostic::simple("find('.a')", "2 elements")]);
            let diagnostic = err.diagnostic().expect("assertion keeps its diagnostic");
            match diagnostic {
                Diagnostic::Path(nodes) => assert_eq!(nodes.len(), 2),
                other => panic!("expected a path node, got {other:?}"),
            }
        }

        #[test]
        fn test_diff_payloads_survive() {
            let err = BuscarError::assertion_diff(
                "value mismatch",
                Diagnostic::error("value mismatch"),
                serde_json::json!("a"),
                serde_json::json!("b"),
            );
            match err {
                BuscarError::AssertionFailed {
                    expected, actual, ..
                } => {
                    assert_eq!(expected, Some(serde_json::json!("a")));
                    assert_eq!(actual, Some(serde_json::json!("b")));
                }
                other => panic!("expected assertion, got {other:?}"),
            }
        }
    }
}
