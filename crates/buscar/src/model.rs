//! Structural models: literal/object/array/function descriptions of UI state.
//!
//! One model value feeds both sides of the matcher — `set` writes it into
//! the page, `should_contain` asserts the page already looks like it. Build
//! models from plain Rust values via `From`, from the [`crate::model!`]
//! macro, or the explicit constructors.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::query::Query;
use crate::result::BuscarResult;

/// A function model: invoked with the re-scoped query.
///
/// Model functions are synchronous by construction; the whole reconciliation
/// pass is retried as one atomic unit and never partially resumed.
pub type ModelFn = Arc<dyn Fn(Query) -> BuscarResult<()> + Send + Sync>;

/// A scalar model value
#[derive(Debug, Clone)]
pub enum Literal {
    /// Exact text
    Text(String),
    /// Numeric value, compared after parsing the field's text
    Number(f64),
    /// Boolean, for checkboxes
    Bool(bool),
    /// Regular expression matched against the field's text
    Pattern(Regex),
}

impl Literal {
    /// Whether the literal accepts the given actual text
    #[must_use]
    pub fn accepts(&self, actual: &str) -> bool {
        match self {
            Self::Text(expected) => actual.trim() == expected,
            Self::Number(expected) => actual
                .trim()
                .parse::<f64>()
                .is_ok_and(|n| (n - expected).abs() < f64::EPSILON),
            Self::Bool(expected) => actual.trim() == expected.to_string(),
            Self::Pattern(pattern) => pattern.is_match(actual),
        }
    }

    /// The text a setter writes for this literal
    #[must_use]
    pub fn written_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Number(n) => format_number(*n),
            Self::Bool(b) => b.to_string(),
            Self::Pattern(pattern) => pattern.as_str().to_string(),
        }
    }

    /// JSON rendering used for expected/actual diff payloads
    #[must_use]
    pub fn expected_json(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Number(n) => serde_json::json!(n),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Pattern(pattern) => serde_json::json!(format!("/{}/", pattern.as_str())),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "'{text}'"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Pattern(pattern) => write!(f, "/{}/", pattern.as_str()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

/// A structural model of desired or expected UI state
#[derive(Clone)]
pub enum Model {
    /// A scalar: the single matched element's field value
    Literal(Literal),
    /// Keys are sub-selectors under one matched element; values recurse
    Object(Vec<(String, Model)>),
    /// Element count must equal the length; each index recurses
    Array(Vec<Model>),
    /// Invoked with the re-scoped query
    Func(ModelFn),
}

impl Model {
    /// An object model from key/sub-model pairs, preserving order
    #[must_use]
    pub fn object(entries: Vec<(String, Model)>) -> Self {
        Self::Object(entries)
    }

    /// An array model
    #[must_use]
    pub fn array(items: Vec<Model>) -> Self {
        Self::Array(items)
    }

    /// A function model
    #[must_use]
    pub fn func(f: impl Fn(Query) -> BuscarResult<()> + Send + Sync + 'static) -> Self {
        Self::Func(Arc::new(f))
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::Object(entries) => {
                let inner = entries
                    .iter()
                    .map(|(key, value)| format!("'{key}': {value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{inner}}}")
            }
            Self::Array(items) => {
                let inner = items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{inner}]")
            }
            Self::Func(_) => f.write_str("<function>"),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model({self})")
    }
}

impl From<&str> for Model {
    fn from(text: &str) -> Self {
        Self::Literal(Literal::Text(text.to_string()))
    }
}

impl From<String> for Model {
    fn from(text: String) -> Self {
        Self::Literal(Literal::Text(text))
    }
}

impl From<f64> for Model {
    fn from(n: f64) -> Self {
        Self::Literal(Literal::Number(n))
    }
}

impl From<i64> for Model {
    fn from(n: i64) -> Self {
        Self::Literal(Literal::Number(n as f64))
    }
}

impl From<i32> for Model {
    fn from(n: i32) -> Self {
        Self::Literal(Literal::Number(f64::from(n)))
    }
}

impl From<bool> for Model {
    fn from(b: bool) -> Self {
        Self::Literal(Literal::Bool(b))
    }
}

impl From<Regex> for Model {
    fn from(pattern: Regex) -> Self {
        Self::Literal(Literal::Pattern(pattern))
    }
}

impl From<Vec<Model>> for Model {
    fn from(items: Vec<Model>) -> Self {
        Self::Array(items)
    }
}

/// Build a [`Model`] with JSON-like syntax.
///
/// ```
/// use buscar::model;
///
/// let login = model!({
///     ".name": "bob",
///     ".remember-me": true,
/// });
/// let rows = model!(["first", "second"]);
/// ```
#[macro_export]
macro_rules! model {
    ({ $($key:literal : $value:tt),* $(,)? }) => {
        $crate::model::Model::object(vec![
            $( ($key.to_string(), $crate::model!($value)) ),*
        ])
    };
    ([ $($item:tt),* $(,)? ]) => {
        $crate::model::Model::array(vec![ $( $crate::model!($item) ),* ])
    };
    ($other:expr) => {
        $crate::model::Model::from($other)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    mod literal_tests {
        use super::*;

        #[test]
        fn test_text_compares_trimmed() {
            let literal = Literal::Text("bob".to_string());
            assert!(literal.accepts("  bob "));
            assert!(!literal.accepts("alice"));
        }

        #[test]
        fn test_number_parses_actual() {
            let literal = Literal::Number(42.0);
            assert!(literal.accepts("42"));
            assert!(!literal.accepts("41"));
            assert!(!literal.accepts("forty-two"));
        }

        #[test]
        fn test_pattern_matches() {
            let literal = Literal::Pattern(Regex::new("^b.b$").expect("valid regex"));
            assert!(literal.accepts("bob"));
            assert!(!literal.accepts("alice"));
        }

        #[test]
        fn test_integer_numbers_render_without_fraction() {
            assert_eq!(Literal::Number(42.0).to_string(), "42");
            assert_eq!(Literal::Number(1.5).to_string(), "1.5");
        }
    }

    mod macro_tests {
        use super::*;

        #[test]
        fn test_object_model_preserves_key_order() {
            let m = model!({ ".b": "x", ".a": "y" });
            match m {
                Model::Object(entries) => {
                    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                    assert_eq!(keys, vec![".b", ".a"]);
                }
                other => panic!("expected an object model, got {other:?}"),
            }
        }

        #[test]
        fn test_array_model() {
            let m = model!(["x", "y"]);
            match m {
                Model::Array(items) => assert_eq!(items.len(), 2),
                other => panic!("expected an array model, got {other:?}"),
            }
        }

        #[test]
        fn test_nested_models() {
            let m = model!({ "ul": ["one", "two"], ".flag": true });
            assert_eq!(m.to_string(), "{'ul': ['one', 'two'], '.flag': true}");
        }

        #[test]
        fn test_empty_object_and_array() {
            assert_eq!(model!({}).to_string(), "{}");
            assert_eq!(model!([]).to_string(), "[]");
        }
    }
}
