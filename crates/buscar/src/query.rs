//! The immutable query pipeline: builder, lazy executor, retry driver.
//!
//! A [`Query`] is a value describing *what* to find or assert — an opaque
//! input scope, an ordered list of transforms, at most one terminal action —
//! and nothing happens until [`Query::resolve`] drives it through the retry
//! scheduler. Every builder method returns a new `Query` with a longer
//! pipeline; ancestors are never mutated, so queries fork freely.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::diagnostic::Diagnostic;
use crate::dom::{render_elements, Dom, ElementHandle, SelectorOptions};
use crate::registry::DefinitionRegistry;
use crate::result::{BuscarError, BuscarResult};
use crate::retry::{Poll, RetrySettings, Scheduler, DEFAULT_INTERVAL_MS, DEFAULT_TIMEOUT_MS};

/// The value flowing through a pipeline.
///
/// Almost every step maps element collections to element collections; the
/// detect combinator additionally tags its winner's value with the branch
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    /// An ordered element collection
    Elements(Vec<ElementHandle>),
    /// A detect winner: which branch matched, and what it produced
    Detected {
        /// Winning branch key
        key: String,
        /// The winning branch's value
        value: Box<QueryValue>,
    },
}

impl QueryValue {
    /// Borrow the element collection
    ///
    /// # Errors
    ///
    /// Returns a usage error when the value is not an element collection
    pub fn elements(&self) -> BuscarResult<&[ElementHandle]> {
        match self {
            Self::Elements(elements) => Ok(elements),
            Self::Detected { .. } => Err(BuscarError::usage(
                "expected an element collection, found a detect result",
            )),
        }
    }

    /// Take the element collection
    ///
    /// # Errors
    ///
    /// Returns a usage error when the value is not an element collection
    pub fn into_elements(self) -> BuscarResult<Vec<ElementHandle>> {
        match self {
            Self::Elements(elements) => Ok(elements),
            Self::Detected { .. } => Err(BuscarError::usage(
                "expected an element collection, found a detect result",
            )),
        }
    }
}

/// A resolved attempt: the final value plus the diagnostic tree of the
/// execution that produced it
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The pipeline's final value
    pub value: QueryValue,
    /// The successful attempt's diagnostic tree
    pub diagnostic: Diagnostic,
}

/// One transform step's output
#[derive(Debug, Clone)]
pub struct Step {
    /// The value handed to the next step
    pub value: QueryValue,
    /// Diagnostic node recording what this step produced
    pub node: Diagnostic,
}

/// A transform body: maps the incoming value to a [`Step`] or fails
pub type TransformFn = dyn Fn(&ExecContext, QueryValue) -> BuscarResult<Step> + Send + Sync;

#[derive(Clone)]
struct QueryStep {
    description: String,
    run: Arc<TransformFn>,
}

/// Effective options a query resolves under
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Total retry budget
    pub timeout: Duration,
    /// Wait between retry attempts
    pub interval: Duration,
    /// Restrict selector matches to visible elements
    pub visible_only: bool,
    /// Custom scheduler; `None` uses the polling default
    pub scheduler: Option<Arc<dyn Scheduler>>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            visible_only: true,
            scheduler: None,
        }
    }
}

/// An options patch: only the fields set here override the parent's options
#[derive(Debug, Clone, Default)]
pub struct Settings {
    timeout: Option<Duration>,
    interval: Option<Duration>,
    visible_only: Option<bool>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Settings {
    /// Create an empty patch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the retry timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry interval
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Override visible-only filtering
    #[must_use]
    pub const fn visible_only(mut self, visible_only: bool) -> Self {
        self.visible_only = Some(visible_only);
        self
    }

    /// Override the scheduler
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Execution context handed to every transform: the DOM capability, the
/// effective options, and the registry, plus scoped-query construction
pub struct ExecContext {
    dom: Arc<dyn Dom>,
    options: QueryOptions,
    registry: DefinitionRegistry,
}

impl ExecContext {
    /// The injected DOM capability
    #[must_use]
    pub fn dom(&self) -> &dyn Dom {
        &*self.dom
    }

    /// The options the query resolves under
    #[must_use]
    pub const fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Selector options derived from the query options
    #[must_use]
    pub const fn selector_options(&self) -> SelectorOptions {
        SelectorOptions {
            visible_only: self.options.visible_only,
        }
    }

    /// A fresh query scoped to the given elements, inheriting options and
    /// registry but with an empty pipeline of its own
    #[must_use]
    pub fn scoped(&self, elements: Vec<ElementHandle>) -> Query {
        Query {
            dom: Arc::clone(&self.dom),
            input: Some(elements),
            steps: Vec::new(),
            action: None,
            has_expectation: false,
            action_fired: AtomicBool::new(false),
            options: self.options.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Render an element collection for a diagnostic node
    #[must_use]
    pub fn render(&self, elements: &[ElementHandle]) -> String {
        render_elements(self.dom(), elements)
    }

    pub(crate) const fn field_types(&self) -> &crate::fields::FieldTypes {
        self.registry.field_types()
    }
}

/// An immutable, composable, lazily-executed DOM query
pub struct Query {
    dom: Arc<dyn Dom>,
    input: Option<Vec<ElementHandle>>,
    steps: Vec<QueryStep>,
    action: Option<QueryStep>,
    has_expectation: bool,
    action_fired: AtomicBool,
    options: QueryOptions,
    registry: DefinitionRegistry,
}

impl Clone for Query {
    fn clone(&self) -> Self {
        Self {
            dom: Arc::clone(&self.dom),
            input: self.input.clone(),
            steps: self.steps.clone(),
            action: self.action.clone(),
            has_expectation: self.has_expectation,
            action_fired: AtomicBool::new(false),
            options: self.options.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("steps", &self.steps.len())
            .field("has_action", &self.action.is_some())
            .field("has_expectation", &self.has_expectation)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Create a root query scoped to the document
#[must_use]
pub fn scope(dom: Arc<dyn Dom>) -> Query {
    Query::new(dom)
}

impl Query {
    /// Create a root query with the standard definitions and field types
    #[must_use]
    pub fn new(dom: Arc<dyn Dom>) -> Self {
        Self {
            dom,
            input: None,
            steps: Vec::new(),
            action: None,
            has_expectation: false,
            action_fired: AtomicBool::new(false),
            options: QueryOptions::default(),
            registry: DefinitionRegistry::with_defaults(),
        }
    }

    /// The number of transform steps in the pipeline
    #[must_use]
    pub fn transform_count(&self) -> usize {
        self.steps.len()
    }

    /// The options this query resolves under
    #[must_use]
    pub const fn query_options(&self) -> &QueryOptions {
        &self.options
    }

    /// Whether the query carries an expectation or action, making it
    /// resolvable
    #[must_use]
    pub const fn carries_expectation(&self) -> bool {
        self.has_expectation || self.action.is_some()
    }

    /// Whether a terminal action is attached
    #[must_use]
    pub const fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub(crate) const fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut DefinitionRegistry {
        &mut self.registry
    }

    /// Append a transform step; returns a new query
    #[must_use]
    pub fn transform(
        &self,
        description: impl Into<String>,
        run: impl Fn(&ExecContext, QueryValue) -> BuscarResult<Step> + Send + Sync + 'static,
    ) -> Self {
        let mut next = self.clone();
        next.steps.push(QueryStep {
            description: description.into(),
            run: Arc::new(run),
        });
        next
    }

    /// Append an expectation: `check` runs for its error side effect only,
    /// the value passes through unchanged, and the query becomes resolvable
    #[must_use]
    pub fn expect(
        &self,
        description: impl Into<String>,
        check: impl Fn(&ExecContext, &QueryValue) -> BuscarResult<()> + Send + Sync + 'static,
    ) -> Self {
        let description = description.into();
        let label = description.clone();
        let next = self.transform(description, move |ctx, value| {
            check(ctx, &value)?;
            let rendered = match &value {
                QueryValue::Elements(elements) => ctx.render(elements),
                QueryValue::Detected { key, .. } => format!("detected '{key}'"),
            };
            Ok(Step {
                node: Diagnostic::simple(label.clone(), rendered),
                value,
            })
        });
        next.marked()
    }

    /// Mark the query as carrying an expectation
    pub(crate) fn marked(mut self) -> Self {
        self.has_expectation = true;
        self
    }

    /// Attach the terminal action; returns a new query.
    ///
    /// # Panics
    ///
    /// Panics if an action is already attached — a query may only ever have
    /// one, independent of builder order.
    #[must_use]
    pub fn action(
        &self,
        description: impl Into<String>,
        run: impl Fn(&ExecContext, QueryValue) -> BuscarResult<Step> + Send + Sync + 'static,
    ) -> Self {
        assert!(
            self.action.is_none(),
            "a query may only have one action; this query already has one"
        );
        let mut next = self.clone();
        next.action = Some(QueryStep {
            description: description.into(),
            run: Arc::new(run),
        });
        next
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Narrow the scope by a selector.
    ///
    /// The selector is first resolved against the definition registry: a
    /// `Name("arg")` token or a bare registered name invokes its resolver; a
    /// serialized finder token (`{"id": ...}`) resolves through the token
    /// registry; anything else is a plain CSS selector. CSS and named
    /// definitions share one textual namespace, CSS being the fallback.
    ///
    /// # Panics
    ///
    /// Panics on a `Name(...)`-shaped selector with no registered resolver,
    /// or a malformed finder token — static misuse, never retried.
    #[must_use]
    pub fn find(&self, selector: &str) -> Self {
        match self.registry.resolve_find(self, selector) {
            Ok(Some(query)) => query,
            Ok(None) => self.find_css(selector),
            Err(error) => panic!("{error}"),
        }
    }

    pub(crate) fn find_css(&self, css: &str) -> Self {
        let selector = css.to_string();
        self.transform(format!("find('{css}')"), move |ctx, value| {
            let elements = value.into_elements()?;
            let mut seen = HashSet::new();
            let mut found = Vec::new();
            for scope in elements {
                for hit in ctx
                    .dom()
                    .query_selector_all(scope, &selector, ctx.selector_options())
                {
                    if seen.insert(hit) {
                        found.push(hit);
                    }
                }
            }
            let node = Diagnostic::simple(format!("find('{selector}')"), ctx.render(&found));
            Ok(Step {
                value: QueryValue::Elements(found),
                node,
            })
        })
    }

    /// Narrow to the element at `index`; out of range yields an empty scope
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.transform(format!("index({index})"), move |ctx, value| {
            let elements = value.into_elements()?;
            let picked: Vec<ElementHandle> = elements.get(index).copied().into_iter().collect();
            let node = Diagnostic::simple(format!("index({index})"), ctx.render(&picked));
            Ok(Step {
                value: QueryValue::Elements(picked),
                node,
            })
        })
    }

    /// Keep only elements the predicate accepts
    #[must_use]
    pub fn filter(
        &self,
        description: impl Into<String>,
        predicate: impl Fn(&dyn Dom, ElementHandle) -> bool + Send + Sync + 'static,
    ) -> Self {
        let description = description.into();
        let label = description.clone();
        self.transform(description, move |ctx, value| {
            let elements = value.into_elements()?;
            let kept: Vec<ElementHandle> = elements
                .into_iter()
                .filter(|el| predicate(ctx.dom(), *el))
                .collect();
            let node = Diagnostic::simple(label.clone(), ctx.render(&kept));
            Ok(Step {
                value: QueryValue::Elements(kept),
                node,
            })
        })
    }

    // ------------------------------------------------------------------
    // Cardinality expectations
    // ------------------------------------------------------------------

    /// Expect exactly one element in scope
    #[must_use]
    pub fn expect_one_element(&self) -> Self {
        self.expect("expected one element", |ctx, value| {
            let elements = value.elements()?;
            if elements.len() == 1 {
                Ok(())
            } else {
                Err(BuscarError::assertion(
                    format!("expected one element, found {}", elements.len()),
                    Diagnostic::error(ctx.render(elements)),
                ))
            }
        })
    }

    /// Expect at least one element in scope
    #[must_use]
    pub fn expect_some_elements(&self) -> Self {
        self.expect("expected some elements", |_ctx, value| {
            let elements = value.elements()?;
            if elements.is_empty() {
                Err(BuscarError::assertion(
                    "expected some elements, found none",
                    Diagnostic::error("0 elements"),
                ))
            } else {
                Ok(())
            }
        })
    }

    /// Expect no elements in scope
    #[must_use]
    pub fn expect_no_elements(&self) -> Self {
        self.expect("expected no elements", |ctx, value| {
            let elements = value.elements()?;
            if elements.is_empty() {
                Ok(())
            } else {
                Err(BuscarError::assertion(
                    format!("expected no elements, found {}", elements.len()),
                    Diagnostic::error(ctx.render(elements)),
                ))
            }
        })
    }

    /// Expect at least one element in scope
    #[must_use]
    pub fn should_exist(&self) -> Self {
        self.expect_some_elements()
    }

    /// Expect no elements in scope
    #[must_use]
    pub fn should_not_exist(&self) -> Self {
        self.expect_no_elements()
    }

    // ------------------------------------------------------------------
    // Terminal actions
    // ------------------------------------------------------------------

    /// Click the single matched element
    #[must_use]
    pub fn click(&self) -> Self {
        self.expect_one_element().action("click", |ctx, value| {
            let element = single(&value)?;
            ctx.dom().click(element)?;
            let node = Diagnostic::simple("click", ctx.dom().describe_element(element));
            Ok(Step { value, node })
        })
    }

    /// Submit the form containing the single matched element
    #[must_use]
    pub fn submit(&self) -> Self {
        self.expect_one_element().action("submit", |ctx, value| {
            let element = single(&value)?;
            ctx.dom().submit(element)?;
            let node = Diagnostic::simple("submit", ctx.dom().describe_element(element));
            Ok(Step { value, node })
        })
    }

    /// Type text into the single matched element
    #[must_use]
    pub fn type_in(&self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.expect_one_element()
            .action(format!("typeIn('{text}')"), move |ctx, value| {
                let element = single(&value)?;
                ctx.dom().enter_text(element, &text)?;
                let node = Diagnostic::simple(
                    format!("typeIn('{text}')"),
                    ctx.dom().describe_element(element),
                );
                Ok(Step { value, node })
            })
    }

    /// Choose an option from the single matched select
    #[must_use]
    pub fn select(&self, option: impl Into<String>) -> Self {
        let option = option.into();
        self.expect_one_element()
            .action(format!("select('{option}')"), move |ctx, value| {
                let element = single(&value)?;
                ctx.dom().select_option(element, &option)?;
                let node = Diagnostic::simple(
                    format!("select('{option}')"),
                    ctx.dom().describe_element(element),
                );
                Ok(Step { value, node })
            })
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    /// Apply an options patch; unset fields inherit from this query
    #[must_use]
    pub fn options(&self, settings: Settings) -> Self {
        let mut next = self.clone();
        if let Some(timeout) = settings.timeout {
            next.options.timeout = timeout;
        }
        if let Some(interval) = settings.interval {
            next.options.interval = interval;
        }
        if let Some(visible_only) = settings.visible_only {
            next.options.visible_only = visible_only;
        }
        if let Some(scheduler) = settings.scheduler {
            next.options.scheduler = Some(scheduler);
        }
        next
    }

    /// Override the retry timeout
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.options(Settings::new().timeout(timeout))
    }

    /// Override the retry interval
    #[must_use]
    pub fn with_interval(&self, interval: Duration) -> Self {
        self.options(Settings::new().interval(interval))
    }

    /// Override visible-only filtering
    #[must_use]
    pub fn with_visible_only(&self, visible_only: bool) -> Self {
        self.options(Settings::new().visible_only(visible_only))
    }

    /// Override the scheduler
    #[must_use]
    pub fn with_scheduler(&self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.options(Settings::new().scheduler(scheduler))
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    pub(crate) fn context(&self) -> ExecContext {
        ExecContext {
            dom: Arc::clone(&self.dom),
            options: self.options.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Run the pipeline once, without retrying.
    ///
    /// Threads the input through every transform in order, building one
    /// diagnostic node per step; a failing step gets the partial path
    /// attached to its error. After all transforms succeed, an attached
    /// action that has not yet fired runs exactly once and is marked fired —
    /// the per-instance flag guarantees a side-effecting action fires once
    /// even when the preceding assertions retried many times.
    ///
    /// # Errors
    ///
    /// Returns the first step's error, with the partial path attached
    pub fn execute(&self) -> BuscarResult<Resolution> {
        let ctx = self.context();
        let mut value = QueryValue::Elements(
            self.input
                .clone()
                .unwrap_or_else(|| vec![self.dom.root()]),
        );
        let mut trail: Vec<Diagnostic> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            trace!(step = %step.description, "running transform");
            match (step.run)(&ctx, value) {
                Ok(Step { value: next, node }) => {
                    trail.push(node);
                    value = next;
                }
                Err(error) => return Err(error.with_trail(trail)),
            }
        }
        if let Some(action) = &self.action {
            if self.action_fired.swap(true, Ordering::SeqCst) {
                trace!(action = %action.description, "action already fired; skipping");
            } else {
                match (action.run)(&ctx, value) {
                    Ok(Step { value: next, node }) => {
                        trail.push(node);
                        value = next;
                    }
                    Err(error) => return Err(error.with_trail(trail)),
                }
            }
        }
        Ok(Resolution {
            value,
            diagnostic: Diagnostic::Path(trail),
        })
    }

    pub(crate) fn execute_elements(&self) -> BuscarResult<Vec<ElementHandle>> {
        self.execute()?.value.into_elements()
    }

    /// Resolve the deferred query: the sole way it produces a value.
    ///
    /// Drives [`Query::execute`] through the retry scheduler; assertion
    /// failures are retried until the timeout, everything else returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns a usage error when the query carries no expectation or
    /// action; otherwise the final attempt's error once the budget is spent
    pub fn resolve(&self) -> BuscarResult<QueryValue> {
        if !self.carries_expectation() {
            return Err(BuscarError::usage(
                "queries must carry at least one expectation or action before they can be resolved",
            ));
        }
        let settings = RetrySettings {
            timeout: self.options.timeout,
            interval: self.options.interval,
        };
        let fallback;
        let scheduler: &dyn Scheduler = match &self.options.scheduler {
            Some(custom) => &**custom,
            None => {
                fallback = Poll::new();
                &fallback
            }
        };
        let resolution = scheduler.run(&settings, &mut || self.execute())?;
        Ok(resolution.value)
    }

    /// Resolve and take the final element collection
    ///
    /// # Errors
    ///
    /// As [`Query::resolve`]
    pub fn resolve_elements(&self) -> BuscarResult<Vec<ElementHandle>> {
        self.resolve()?.into_elements()
    }
}

/// The single element of a one-element collection
fn single(value: &QueryValue) -> BuscarResult<ElementHandle> {
    let elements = value.elements()?;
    elements
        .first()
        .copied()
        .ok_or_else(|| BuscarError::usage("action ran against an empty scope"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{el, FakeDom};
    use crate::retry::TestClock;
    use std::sync::atomic::AtomicUsize;

    fn fixture() -> (FakeDom, Arc<dyn Dom>) {
        let dom = FakeDom::new();
        let shared: Arc<dyn Dom> = Arc::new(dom.clone());
        (dom, shared)
    }

    fn test_scheduler() -> Arc<dyn Scheduler> {
        Arc::new(Poll::with_clock(Arc::new(TestClock::new())))
    }

    mod immutability_tests {
        use super::*;

        #[test]
        fn test_builder_calls_leave_parent_unchanged() {
            let (_dom, shared) = fixture();
            let parent = scope(shared).find(".form");
            let before = parent.transform_count();
            let timeout_before = parent.query_options().timeout;

            let _child = parent.find(".name").with_timeout(Duration::from_secs(9));

            assert_eq!(parent.transform_count(), before);
            assert_eq!(parent.query_options().timeout, timeout_before);
        }

        #[test]
        fn test_options_inherited_by_children() {
            let (_dom, shared) = fixture();
            let parent = scope(shared).with_timeout(Duration::from_secs(7));
            let child = parent.find(".x");
            assert_eq!(child.query_options().timeout, Duration::from_secs(7));
        }

        #[test]
        fn test_expectation_flag_not_shared_with_parent() {
            let (_dom, shared) = fixture();
            let parent = scope(shared);
            let _child = parent.should_exist();
            assert!(!parent.carries_expectation());
        }
    }

    mod action_tests {
        use super::*;

        #[test]
        #[should_panic(expected = "may only have one action")]
        fn test_second_action_panics() {
            let (_dom, shared) = fixture();
            let q = scope(shared).find("button").click();
            let _ = q.action("again", |_, value| {
                Ok(Step {
                    node: Diagnostic::simple("again", ""),
                    value,
                })
            });
        }

        #[test]
        fn test_action_fires_exactly_once_across_retries() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("button").text("Go"));

            let attempts = Arc::new(AtomicUsize::new(0));
            let fired = Arc::new(AtomicUsize::new(0));
            let attempts_in = Arc::clone(&attempts);
            let fired_in = Arc::clone(&fired);

            let q = scope(shared)
                .find("button")
                .expect("warms up", move |_, _| {
                    let n = attempts_in.fetch_add(1, Ordering::SeqCst);
                    if n < 4 {
                        Err(BuscarError::assertion(
                            "not ready",
                            Diagnostic::error("not ready"),
                        ))
                    } else {
                        Ok(())
                    }
                })
                .action("count", move |_, value| {
                    let _ = fired_in.fetch_add(1, Ordering::SeqCst);
                    Ok(Step {
                        node: Diagnostic::simple("count", ""),
                        value,
                    })
                })
                .with_scheduler(test_scheduler());

            q.resolve().expect("resolves after five attempts");
            assert_eq!(attempts.load(Ordering::SeqCst), 5);
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_click_records_event() {
            let (dom, shared) = fixture();
            let button = dom.append(dom.root(), el("button").text("Go"));
            scope(shared)
                .find("button")
                .click()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect("click resolves");
            assert_eq!(dom.events_for(button), vec!["click".to_string()]);
        }

        #[test]
        fn test_type_in_sets_value() {
            let (dom, shared) = fixture();
            let input = dom.append(dom.root(), el("input").attr("type", "text"));
            scope(shared)
                .find("input")
                .type_in("hello")
                .with_scheduler(test_scheduler())
                .resolve()
                .expect("typeIn resolves");
            assert_eq!(dom.value_of(input), Some("hello".to_string()));
        }

        #[test]
        fn test_click_requires_one_element() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("button"));
            dom.append(dom.root(), el("button"));
            let err = scope(shared)
                .find("button")
                .click()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect_err("two buttons cannot be clicked");
            assert_eq!(err.message(), "expected one element, found 2");
        }
    }

    mod resolve_tests {
        use super::*;

        #[test]
        fn test_resolve_requires_expectation_or_action() {
            let (_dom, shared) = fixture();
            let err = scope(shared)
                .find(".x")
                .resolve()
                .expect_err("bare navigation is not resolvable");
            assert!(matches!(err, BuscarError::Usage { .. }));
        }

        #[test]
        fn test_find_dedups_overlapping_scopes() {
            let (dom, shared) = fixture();
            let outer = dom.append(dom.root(), el("div").class("outer"));
            let inner = dom.append(outer, el("div").class("outer"));
            let _leaf = dom.append(inner, el("span").class("leaf"));

            // both .outer scopes see the same leaf; it must appear once
            let leaves = scope(shared)
                .find(".outer")
                .find(".leaf")
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve_elements()
                .expect("leaf is found");
            assert_eq!(leaves.len(), 1);
        }

        #[test]
        fn test_failure_message_carries_diagnostic_path() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("form").class("login"));
            let err = scope(shared)
                .find(".login")
                .find(".name")
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect_err("no .name inside the form");
            let rendered = err.to_string();
            assert!(rendered.contains("expected some elements, found none"));
            assert!(rendered.contains("find('.login')"));
            assert!(rendered.contains("find('.name')"));
        }

        #[test]
        fn test_visible_only_hides_invisible_elements() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("button").hidden());
            let err = scope(shared.clone())
                .find("button")
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect_err("hidden button is filtered out");
            assert!(err.is_assertion());

            scope(shared)
                .find("button")
                .with_visible_only(false)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect("visible_only off sees the hidden button");
        }
    }

    mod cardinality_tests {
        use super::*;

        #[test]
        fn test_expect_one_element_passes_on_single() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("h1").text("hello"));
            scope(shared)
                .find("h1")
                .expect_one_element()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect("one h1 exists");
        }

        #[test]
        fn test_expect_no_elements_reports_count() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("p"));
            dom.append(dom.root(), el("p"));
            let err = scope(shared)
                .find("p")
                .expect_no_elements()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect_err("two paragraphs exist");
            assert_eq!(err.message(), "expected no elements, found 2");
        }

        #[test]
        fn test_should_not_exist_passes_on_empty() {
            let (_dom, shared) = fixture();
            scope(shared)
                .find(".missing")
                .should_not_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect("nothing matches .missing");
        }
    }

    mod navigation_tests {
        use super::*;

        #[test]
        fn test_index_picks_nth_element() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("li").text("a"));
            let second = dom.append(dom.root(), el("li").text("b"));
            let picked = scope(shared)
                .find("li")
                .index(1)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve_elements()
                .expect("second li exists");
            assert_eq!(picked, vec![second]);
        }

        #[test]
        fn test_index_out_of_range_is_empty() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("li"));
            let err = scope(shared)
                .find("li")
                .index(5)
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve()
                .expect_err("no sixth li");
            assert!(err.is_assertion());
        }

        #[test]
        fn test_filter_keeps_matching_elements() {
            let (dom, shared) = fixture();
            dom.append(dom.root(), el("li").text("keep"));
            dom.append(dom.root(), el("li").text("drop"));
            let kept = scope(shared)
                .find("li")
                .filter("text is keep", |dom, el| {
                    dom.element_inner_text(el).trim() == "keep"
                })
                .should_exist()
                .with_scheduler(test_scheduler())
                .resolve_elements()
                .expect("one li kept");
            assert_eq!(kept.len(), 1);
        }
    }
}
