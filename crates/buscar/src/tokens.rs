//! Serializable finder/matcher tokens.
//!
//! The token registry is the one intentionally long-lived, shared structure
//! in the engine: an explicit append-only table (never a global static) that
//! assigns each created finder or matcher a monotonically increasing id.
//! Ids are never reused or removed, so lookups are safe under any amount of
//! sharing; the table grows for the life of the process.
//!
//! A token's string form is `{"id": N, "args": [...]}`, which parses back to
//! the original function — this lets a finder travel through purely textual
//! channels (an object-model key, a selector literal) and be resolved from
//! its serialized form alone. Regular-expression arguments round-trip via an
//! explicit `{"prototype": "RegExp", "source": ..., "flags": ...}` encoding.

use std::fmt;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::combinators::branch;
use crate::query::Query;
use crate::result::{BuscarError, BuscarResult};

/// A registered finder/matcher body
pub type FinderFn = dyn Fn(Query, &[TokenArg]) -> BuscarResult<Query> + Send + Sync;

/// A sub-finder of a [`MultiFinder`]: an infallible query builder
pub type SubFinderFn = dyn Fn(Query, &[TokenArg]) -> Query + Send + Sync;

/// Which table namespace an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Navigation: extends the element scope
    Finder,
    /// Matching: filters or asserts against the scope
    Matcher,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finder => f.write_str("finder"),
            Self::Matcher => f.write_str("matcher"),
        }
    }
}

/// One serializable argument of a token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenArg {
    /// Any plain JSON value
    Json(serde_json::Value),
    /// A regular expression, encoded with an explicit prototype marker
    Pattern {
        /// The expression source
        source: String,
        /// Flags, e.g. `i`
        flags: String,
    },
}

impl TokenArg {
    /// A text argument
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Json(serde_json::Value::String(text.into()))
    }

    /// Borrow the argument as a string, if it is one
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(value) => value.as_str(),
            Self::Pattern { .. } => None,
        }
    }

    /// Compile a pattern argument
    ///
    /// # Errors
    ///
    /// Returns a usage error for non-pattern arguments or invalid sources
    pub fn pattern(&self) -> BuscarResult<Regex> {
        match self {
            Self::Pattern { source, flags } => {
                let prefixed = if flags.contains('i') {
                    format!("(?i){source}")
                } else {
                    source.clone()
                };
                Regex::new(&prefixed).map_err(|error| {
                    BuscarError::usage(format!("invalid pattern argument /{source}/: {error}"))
                })
            }
            Self::Json(value) => Err(BuscarError::usage(format!(
                "expected a pattern argument, found {value}"
            ))),
        }
    }
}

impl From<&Regex> for TokenArg {
    fn from(pattern: &Regex) -> Self {
        Self::Pattern {
            source: pattern.as_str().to_string(),
            flags: String::new(),
        }
    }
}

impl From<serde_json::Value> for TokenArg {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl Serialize for TokenArg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(value) => value.serialize(serializer),
            Self::Pattern { source, flags } => serde_json::json!({
                "prototype": "RegExp",
                "source": source,
                "flags": flags,
            })
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TokenArg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.get("prototype").and_then(serde_json::Value::as_str) == Some("RegExp") {
            let source = value
                .get("source")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| D::Error::custom("RegExp encoding is missing 'source'"))?
                .to_string();
            let flags = value
                .get("flags")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Self::Pattern { source, flags })
        } else {
            Ok(Self::Json(value))
        }
    }
}

/// A token: a registered id plus the arguments for one use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The registry id
    pub id: usize,
    /// Arguments for this use
    pub args: Vec<TokenArg>,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// A created finder/matcher: mints tokens for its registry entry
#[derive(Debug, Clone, Copy)]
pub struct TokenHandle {
    id: usize,
    kind: TokenKind,
}

impl TokenHandle {
    /// The registry id
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Which namespace the handle belongs to
    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Mint a token with arguments
    #[must_use]
    pub fn token(&self, args: Vec<TokenArg>) -> Token {
        Token { id: self.id, args }
    }
}

/// A parsed token: the original function plus the decoded arguments
#[derive(Clone)]
pub struct ParsedToken {
    /// The registered function
    pub finder: Arc<FinderFn>,
    /// Decoded arguments
    pub args: Vec<TokenArg>,
    /// The registry id
    pub id: usize,
}

impl fmt::Debug for ParsedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedToken")
            .field("finder", &"<finder fn>")
            .field("args", &self.args)
            .field("id", &self.id)
            .finish()
    }
}

struct TokenEntry {
    kind: TokenKind,
    run: Arc<FinderFn>,
}

/// The append-only finder/matcher table.
///
/// Construct one per process (the root query does this) and share it by
/// reference; entries are never pruned.
pub struct TokenRegistry {
    entries: RwLock<Vec<TokenEntry>>,
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

impl TokenRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// The number of registered entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("token registry lock").len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a finder; returns its handle
    pub fn create_finder(
        &self,
        run: impl Fn(Query, &[TokenArg]) -> BuscarResult<Query> + Send + Sync + 'static,
    ) -> TokenHandle {
        self.register(TokenKind::Finder, Arc::new(run))
    }

    /// Register a matcher; returns its handle
    pub fn create_matcher(
        &self,
        run: impl Fn(Query, &[TokenArg]) -> BuscarResult<Query> + Send + Sync + 'static,
    ) -> TokenHandle {
        self.register(TokenKind::Matcher, Arc::new(run))
    }

    fn register(&self, kind: TokenKind, run: Arc<FinderFn>) -> TokenHandle {
        let mut entries = self.entries.write().expect("token registry lock");
        let id = entries.len();
        entries.push(TokenEntry { kind, run });
        debug!(id, %kind, "registered token");
        TokenHandle { id, kind }
    }

    /// Parse a finder token string back to its function and arguments
    ///
    /// # Errors
    ///
    /// Returns a usage error for malformed JSON, unknown ids, or a matcher
    /// token passed where a finder is expected
    pub fn parse_finder(&self, token: &str) -> BuscarResult<ParsedToken> {
        self.parse(token, TokenKind::Finder)
    }

    /// Parse a matcher token string back to its function and arguments
    ///
    /// # Errors
    ///
    /// As [`TokenRegistry::parse_finder`], with the kinds swapped
    pub fn parse_matcher(&self, token: &str) -> BuscarResult<ParsedToken> {
        self.parse(token, TokenKind::Matcher)
    }

    fn parse(&self, token: &str, expected: TokenKind) -> BuscarResult<ParsedToken> {
        let decoded: Token = serde_json::from_str(token).map_err(|error| {
            BuscarError::usage(format!("unrecognized token '{token}': {error}"))
        })?;
        let entries = self.entries.read().expect("token registry lock");
        let entry = entries.get(decoded.id).ok_or_else(|| {
            BuscarError::usage(format!("unknown {expected} token id {}", decoded.id))
        })?;
        if entry.kind != expected {
            return Err(BuscarError::usage(format!(
                "token {} is a {}, not a {expected}",
                decoded.id, entry.kind
            )));
        }
        Ok(ParsedToken {
            finder: Arc::clone(&entry.run),
            args: decoded.args,
            id: decoded.id,
        })
    }

    /// Create a multi finder: an ordered, mutable list of named sub-finders
    /// executed via concat
    #[must_use]
    pub fn create_multi_finder(self: &Arc<Self>) -> MultiFinder {
        MultiFinder::create(self, TokenKind::Finder)
    }

    /// Create a multi matcher, as [`TokenRegistry::create_multi_finder`]
    #[must_use]
    pub fn create_multi_matcher(self: &Arc<Self>) -> MultiFinder {
        MultiFinder::create(self, TokenKind::Matcher)
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type MultiParts = Arc<RwLock<Vec<(String, Arc<SubFinderFn>)>>>;

/// An extensible catalog: named sub-finders run via concat in list order.
///
/// Backs vocabularies like "Button" (native button, `input[type=button]`,
/// link) where embedders add and remove strategies at runtime. The part list
/// is read at execution time, so changes apply to tokens already minted.
pub struct MultiFinder {
    handle: TokenHandle,
    parts: MultiParts,
    registry: Arc<TokenRegistry>,
}

impl fmt::Debug for MultiFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiFinder")
            .field("id", &self.handle.id())
            .field("parts", &self.names())
            .finish()
    }
}

impl MultiFinder {
    fn create(registry: &Arc<TokenRegistry>, kind: TokenKind) -> Self {
        let parts: MultiParts = Arc::new(RwLock::new(Vec::new()));
        let dispatch = Self::dispatcher(&parts);
        let handle = match kind {
            TokenKind::Finder => registry.create_finder(dispatch),
            TokenKind::Matcher => registry.create_matcher(dispatch),
        };
        Self {
            handle,
            parts,
            registry: Arc::clone(registry),
        }
    }

    fn dispatcher(
        parts: &MultiParts,
    ) -> impl Fn(Query, &[TokenArg]) -> BuscarResult<Query> + Send + Sync + 'static {
        let parts = Arc::clone(parts);
        move |query, args| {
            let snapshot: Vec<Arc<SubFinderFn>> = parts
                .read()
                .expect("multi finder lock")
                .iter()
                .map(|(_, f)| Arc::clone(f))
                .collect();
            let args: Vec<TokenArg> = args.to_vec();
            let branches = snapshot
                .into_iter()
                .map(|f| {
                    let args = args.clone();
                    branch(move |scoped| f(scoped, &args))
                })
                .collect();
            Ok(query.concat(branches))
        }
    }

    /// The handle for minting tokens
    #[must_use]
    pub const fn handle(&self) -> TokenHandle {
        self.handle
    }

    /// The registry id
    #[must_use]
    pub const fn id(&self) -> usize {
        self.handle.id()
    }

    /// Mint a token with arguments
    #[must_use]
    pub fn token(&self, args: Vec<TokenArg>) -> Token {
        self.handle.token(args)
    }

    /// Append a named sub-finder
    pub fn add_finder(
        &self,
        name: impl Into<String>,
        finder: impl Fn(Query, &[TokenArg]) -> Query + Send + Sync + 'static,
    ) {
        self.parts
            .write()
            .expect("multi finder lock")
            .push((name.into(), Arc::new(finder)));
    }

    /// Remove a sub-finder by name; returns whether it existed
    pub fn remove_finder(&self, name: &str) -> bool {
        let mut parts = self.parts.write().expect("multi finder lock");
        let before = parts.len();
        parts.retain(|(part, _)| part != name);
        parts.len() != before
    }

    /// The registered sub-finder names, in execution order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.parts
            .read()
            .expect("multi finder lock")
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// An independent copy under a fresh id: same parts now, divergent later
    #[must_use]
    pub fn clone_finder(&self) -> Self {
        let copy = Self::create(&self.registry, self.handle.kind());
        let parts = self.parts.read().expect("multi finder lock");
        let mut target = copy.parts.write().expect("multi finder lock");
        for (name, f) in parts.iter() {
            target.push((name.clone(), Arc::clone(f)));
        }
        drop(target);
        drop(parts);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dom;
    use crate::mock::{el, FakeDom};
    use crate::query::scope;
    use crate::retry::{Poll, Scheduler, TestClock};

    fn fixture() -> (FakeDom, Arc<dyn Dom>) {
        let dom = FakeDom::new();
        let shared: Arc<dyn Dom> = Arc::new(dom.clone());
        (dom, shared)
    }

    fn test_scheduler() -> Arc<dyn Scheduler> {
        Arc::new(Poll::with_clock(Arc::new(TestClock::new())))
    }

    mod round_trip_tests {
        use super::*;

        #[test]
        fn test_token_parses_back_to_the_same_function() {
            let registry = Arc::new(TokenRegistry::new());
            let handle = registry.create_finder(|q, _args| Ok(q.find(".x")));
            let token = handle.token(vec![]);

            let parsed = registry
                .parse_finder(&token.to_string())
                .expect("token parses");
            assert_eq!(parsed.id, handle.id());
            assert!(parsed.args.is_empty());

            // same entry: the function pointer round-trips
            let again = registry
                .parse_finder(&token.to_string())
                .expect("token parses twice");
            assert!(Arc::ptr_eq(&parsed.finder, &again.finder));
        }

        #[test]
        fn test_wire_format_is_id_and_args() {
            let registry = Arc::new(TokenRegistry::new());
            let handle = registry.create_finder(|q, _| Ok(q));
            let token = handle.token(vec![TokenArg::text("a")]);
            assert_eq!(token.to_string(), r#"{"id":0,"args":["a"]}"#);
        }

        #[test]
        fn test_regex_args_round_trip() {
            let registry = Arc::new(TokenRegistry::new());
            let handle = registry.create_finder(|q, _| Ok(q));
            let pattern = Regex::new("^item-\\d+$").expect("valid regex");
            let token = handle.token(vec![TokenArg::from(&pattern), TokenArg::text("x")]);

            let wire = token.to_string();
            assert!(wire.contains(r#""prototype":"RegExp""#));

            let parsed = registry.parse_finder(&wire).expect("token parses");
            assert_eq!(parsed.args, token.args);
            let compiled = parsed.args[0].pattern().expect("pattern compiles");
            assert!(compiled.is_match("item-42"));
        }

        #[test]
        fn test_case_insensitive_flag_round_trips() {
            let arg = TokenArg::Pattern {
                source: "^go$".to_string(),
                flags: "i".to_string(),
            };
            let json = serde_json::to_string(&arg).expect("serializes");
            let back: TokenArg = serde_json::from_str(&json).expect("deserializes");
            assert_eq!(back, arg);
            assert!(back.pattern().expect("compiles").is_match("GO"));
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_unknown_id_is_a_usage_error() {
            let registry = TokenRegistry::new();
            let err = registry
                .parse_finder(r#"{"id":99,"args":[]}"#)
                .expect_err("nothing registered");
            assert!(matches!(err, BuscarError::Usage { .. }));
        }

        #[test]
        fn test_malformed_token_is_a_usage_error() {
            let registry = TokenRegistry::new();
            let err = registry
                .parse_finder("{not json}")
                .expect_err("malformed token");
            assert!(matches!(err, BuscarError::Usage { .. }));
        }

        #[test]
        fn test_kind_mismatch_is_a_usage_error() {
            let registry = Arc::new(TokenRegistry::new());
            let handle = registry.create_matcher(|q, _| Ok(q));
            let err = registry
                .parse_finder(&handle.token(vec![]).to_string())
                .expect_err("matchers are not finders");
            let message = err.to_string();
            assert!(message.contains("matcher"));
        }

        #[test]
        fn test_ids_are_monotonic_and_never_reused() {
            let registry = Arc::new(TokenRegistry::new());
            let a = registry.create_finder(|q, _| Ok(q));
            let b = registry.create_matcher(|q, _| Ok(q));
            let c = registry.create_finder(|q, _| Ok(q));
            assert_eq!((a.id(), b.id(), c.id()), (0, 1, 2));
            assert_eq!(registry.len(), 3);
        }
    }

    mod resolution_tests {
        use super::*;

        #[test]
        fn test_find_resolves_a_serialized_token() {
            let (dom, shared) = fixture();
            let target = dom.append(dom.root(), el("div").class("via-token"));

            let root = scope(shared);
            let handle = root
                .token_registry()
                .create_finder(|q, _args| Ok(q.find(".via-token")));
            let selector = handle.token(vec![]).to_string();

            let found = root
                .find(&selector)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve_elements()
                .expect("the token resolves through find");
            assert_eq!(found, vec![target]);
        }

        #[test]
        fn test_token_arguments_reach_the_finder() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("div").class("tab-a"));

            let root = scope(shared);
            let handle = root.token_registry().create_finder(|q, args| {
                let name = args
                    .first()
                    .and_then(TokenArg::as_str)
                    .ok_or_else(|| BuscarError::usage("expected a tab name"))?;
                Ok(q.find(&format!(".tab-{name}")))
            });
            let selector = handle.token(vec![TokenArg::text("a")]).to_string();

            root.find(&selector)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect("the argument selects the tab");
        }
    }

    mod multi_finder_tests {
        use super::*;

        #[test]
        fn test_parts_run_via_concat_in_order() {
            let (dom, shared) = fixture();
            let button = dom.append(dom.root(), el("button"));
            dom.set_text(button, "Go");
            let link = dom.append(dom.root(), el("a"));
            dom.set_text(link, "Go");

            let root = scope(shared);
            let multi = root.token_registry().create_multi_finder();
            multi.add_finder("native", |q, args| {
                let label = args.first().and_then(TokenArg::as_str).unwrap_or_default();
                q.find("button").containing(label)
            });
            multi.add_finder("link", |q, args| {
                let label = args.first().and_then(TokenArg::as_str).unwrap_or_default();
                q.find("a").containing(label)
            });

            let selector = multi.token(vec![TokenArg::text("Go")]).to_string();
            let found = root
                .find(&selector)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve_elements()
                .expect("both parts contribute");
            assert_eq!(found, vec![button, link]);
        }

        #[test]
        fn test_remove_finder_applies_to_minted_tokens() {
            let (dom, shared) = fixture();
            let link = dom.append(dom.root(), el("a"));
            dom.set_text(link, "Go");

            let root = scope(shared);
            let multi = root.token_registry().create_multi_finder();
            multi.add_finder("native", |q, _| q.find("button"));
            multi.add_finder("link", |q, _| q.find("a"));
            let selector = multi.token(vec![]).to_string();

            assert!(multi.remove_finder("link"));
            let err = root
                .find(&selector)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect_err("only the button part remains");
            assert!(err.is_assertion());
        }

        #[test]
        fn test_clone_diverges_under_a_fresh_id() {
            let (_dom, shared) = fixture();
            let root = scope(shared);
            let multi = root.token_registry().create_multi_finder();
            multi.add_finder("a", |q, _| q.find(".a"));

            let copy = multi.clone_finder();
            copy.add_finder("b", |q, _| q.find(".b"));

            assert_ne!(multi.id(), copy.id());
            assert_eq!(multi.names(), vec!["a".to_string()]);
            assert_eq!(copy.names(), vec!["a".to_string(), "b".to_string()]);
        }

        #[test]
        fn test_empty_multi_finder_finds_nothing() {
            let (_dom, shared) = fixture();
            let root = scope(shared);
            let multi = root.token_registry().create_multi_finder();
            let selector = multi.token(vec![]).to_string();
            let err = root
                .find(&selector)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect_err("no parts registered, so nothing matches");
            assert!(err.is_assertion());
        }
    }
}
