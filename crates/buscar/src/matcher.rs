//! Structural reconciliation of a model against live query results.
//!
//! One recursive pass, parameterized by a [`ModelActions`] table, backs both
//! writing (`set`: validates the whole model, then applies deferred writes)
//! and asserting (`should_contain`: compares immediately). Any failure
//! aborts the whole pass and the outer scheduler retries it from scratch —
//! a transient mismatch is indistinguishable from a real one until the
//! timeout.

use crate::diagnostic::Diagnostic;
use crate::dom::ElementHandle;
use crate::fields::FieldTypes;
use crate::model::{Literal, Model, ModelFn};
use crate::query::{ExecContext, Query, QueryValue, Step};
use crate::result::{BuscarError, BuscarResult};

/// Hooks parameterizing one reconciliation pass
pub(crate) trait ModelActions {
    /// Handle a literal against the single matched element
    fn value(
        &mut self,
        ctx: &ExecContext,
        element: ElementHandle,
        literal: &Literal,
    ) -> BuscarResult<Diagnostic>;

    /// Handle a function model against the re-scoped query
    fn function(&mut self, scope: Query, f: &ModelFn) -> BuscarResult<Diagnostic>;

    /// Resolve the scope to exactly one element
    fn expect_one(&self, ctx: &ExecContext, scope: &Query) -> BuscarResult<ElementHandle> {
        let elements = scope.execute_elements()?;
        match elements.as_slice() {
            [element] => Ok(*element),
            _ => Err(BuscarError::assertion(
                format!("expected one element, found {}", elements.len()),
                Diagnostic::error(ctx.render(&elements)),
            )),
        }
    }

    /// Build the error for an element-count / model-length mismatch
    fn array_length_error(
        &self,
        _ctx: &ExecContext,
        actual: usize,
        expected: usize,
        detail: Diagnostic,
    ) -> BuscarError {
        BuscarError::assertion_diff(
            format!("expected {expected} elements, found {actual}"),
            detail,
            serde_json::json!(expected),
            serde_json::json!(actual),
        )
    }
}

/// Reconcile `model` against the scope, driving the hooks
pub(crate) fn reconcile(
    ctx: &ExecContext,
    scope: &Query,
    model: &Model,
    actions: &mut dyn ModelActions,
) -> BuscarResult<Diagnostic> {
    match model {
        Model::Literal(literal) => {
            let element = actions.expect_one(ctx, scope)?;
            actions.value(ctx, element, literal)
        }
        Model::Func(f) => actions.function(scope.clone(), f),
        Model::Object(entries) => {
            let element = actions.expect_one(ctx, scope)?;
            if entries.is_empty() {
                return Ok(Diagnostic::simple(
                    "exists",
                    ctx.dom().describe_element(element),
                ));
            }
            let mut nodes = Vec::with_capacity(entries.len());
            for (key, sub) in entries {
                let child = ctx.scoped(vec![element]).find(key);
                let node = reconcile(ctx, &child, sub, actions)?;
                nodes.push(Diagnostic::simple(format!("'{key}'"), node.render()));
            }
            Ok(Diagnostic::Path(nodes))
        }
        Model::Array(items) => {
            let elements = scope.execute_elements()?;
            if elements.len() != items.len() {
                let detail = array_mismatch_detail(ctx, &elements, items);
                return Err(actions.array_length_error(ctx, elements.len(), items.len(), detail));
            }
            let mut nodes = Vec::with_capacity(items.len());
            for (i, sub) in items.iter().enumerate() {
                nodes.push(reconcile(ctx, &scope.index(i), sub, actions)?);
            }
            Ok(Diagnostic::Concat(nodes))
        }
    }
}

/// Best-effort per-index diagnostic for a length mismatch: every actual
/// element is shown, extra ones paired with a missing-model placeholder;
/// model items beyond the actual count are truncated
fn array_mismatch_detail(
    ctx: &ExecContext,
    elements: &[ElementHandle],
    items: &[Model],
) -> Diagnostic {
    let nodes: Vec<Diagnostic> = elements
        .iter()
        .enumerate()
        .map(|(i, element)| {
            let expected = items
                .get(i)
                .map_or_else(|| "(missing)".to_string(), ToString::to_string);
            Diagnostic::simple(
                format!("[{i}] expected {expected}"),
                ctx.dom().describe_element(*element),
            )
        })
        .collect();
    Diagnostic::Concat(nodes)
}

/// Assertion hooks: compare the page against the model immediately
struct AssertActions {
    fields: FieldTypes,
}

impl ModelActions for AssertActions {
    fn value(
        &mut self,
        ctx: &ExecContext,
        element: ElementHandle,
        literal: &Literal,
    ) -> BuscarResult<Diagnostic> {
        let field = self
            .fields
            .first_match(ctx.dom(), element)
            .ok_or_else(|| BuscarError::usage("no field type matches the element"))?;
        let actual = field.read(ctx.dom(), element);
        let accepted = actual.as_deref().is_some_and(|text| literal.accepts(text));
        if accepted {
            Ok(Diagnostic::simple(
                format!("= {literal}"),
                actual.unwrap_or_default(),
            ))
        } else {
            let shown = actual.clone().unwrap_or_else(|| "(no value)".to_string());
            Err(BuscarError::assertion_diff(
                format!("expected {} to be {literal}", field.name()),
                Diagnostic::error(format!(
                    "{} was '{shown}' on {}",
                    field.name(),
                    ctx.dom().describe_element(element)
                )),
                literal.expected_json(),
                actual.map_or(serde_json::Value::Null, serde_json::Value::String),
            ))
        }
    }

    fn function(&mut self, scope: Query, f: &ModelFn) -> BuscarResult<Diagnostic> {
        f(scope)?;
        Ok(Diagnostic::simple("<function>", "matched"))
    }
}

/// Write hooks: validate everything first, then apply deferred writes
struct SetActions {
    fields: FieldTypes,
    writes: Vec<DeferredWrite>,
}

struct DeferredWrite {
    element: ElementHandle,
    field: crate::fields::FieldType,
    literal: Literal,
}

impl SetActions {
    fn new(fields: FieldTypes) -> Self {
        Self {
            fields,
            writes: Vec::new(),
        }
    }

    /// Apply the deferred writes, in model order
    fn apply(&mut self, ctx: &ExecContext) -> BuscarResult<()> {
        for write in self.writes.drain(..) {
            write.field.write(ctx.dom(), write.element, &write.literal)?;
        }
        Ok(())
    }
}

impl ModelActions for SetActions {
    fn value(
        &mut self,
        ctx: &ExecContext,
        element: ElementHandle,
        literal: &Literal,
    ) -> BuscarResult<Diagnostic> {
        let field = self
            .fields
            .first_match(ctx.dom(), element)
            .ok_or_else(|| BuscarError::usage("no field type matches the element"))?;
        if !field.can_write() {
            return Err(BuscarError::usage(format!(
                "cannot set {}: field type '{}' is read-only",
                ctx.dom().describe_element(element),
                field.name()
            )));
        }
        let node = Diagnostic::simple(
            format!("set {literal}"),
            ctx.dom().describe_element(element),
        );
        self.writes.push(DeferredWrite {
            element,
            field: field.clone(),
            literal: literal.clone(),
        });
        Ok(node)
    }

    fn function(&mut self, scope: Query, f: &ModelFn) -> BuscarResult<Diagnostic> {
        f(scope)?;
        Ok(Diagnostic::simple("<function>", "applied"))
    }
}

impl Query {
    /// Write the model into the page.
    ///
    /// The whole model is validated against the live page first (cardinality
    /// checks, field-type resolution); only then do the deferred writes run,
    /// in model order. A validation failure leaves the page untouched and is
    /// retried like any assertion.
    #[must_use]
    pub fn set(&self, model: impl Into<Model>) -> Self {
        let model = model.into();
        let label = format!("set({model})");
        self.transform(label, move |ctx, value| {
            let elements = value.into_elements()?;
            let scope = ctx.scoped(elements.clone());
            let mut actions = SetActions::new(ctx.field_types().clone());
            let node = reconcile(ctx, &scope, &model, &mut actions)?;
            actions.apply(ctx)?;
            Ok(Step {
                value: QueryValue::Elements(elements),
                node,
            })
        })
        .marked()
    }

    /// Assert the page already matches the model
    #[must_use]
    pub fn should_contain(&self, model: impl Into<Model>) -> Self {
        let model = model.into();
        let label = format!("should_contain({model})");
        self.transform(label, move |ctx, value| {
            let elements = value.into_elements()?;
            let scope = ctx.scoped(elements.clone());
            let mut actions = AssertActions {
                fields: ctx.field_types().clone(),
            };
            let node = reconcile(ctx, &scope, &model, &mut actions)?;
            Ok(Step {
                value: QueryValue::Elements(elements),
                node,
            })
        })
        .marked()
    }

    /// Assert the page already matches the model
    #[must_use]
    pub fn should_have(&self, model: impl Into<Model>) -> Self {
        self.should_contain(model)
    }

    /// Keep only elements that, independently re-scoped, match the model.
    ///
    /// No match at all yields an empty collection rather than an error —
    /// emptiness is a valid (possibly retried) intermediate state.
    #[must_use]
    pub fn containing(&self, model: impl Into<Model>) -> Self {
        let model = model.into();
        let label = format!("containing({model})");
        self.transform(label.clone(), move |ctx, value| {
            let elements = value.into_elements()?;
            let mut kept = Vec::new();
            for element in elements {
                let scope = ctx.scoped(vec![element]);
                let mut actions = AssertActions {
                    fields: ctx.field_types().clone(),
                };
                match reconcile(ctx, &scope, &model, &mut actions) {
                    Ok(_) => kept.push(element),
                    Err(error) if error.is_assertion() => {}
                    Err(error) => return Err(error),
                }
            }
            let node = Diagnostic::simple(label.clone(), ctx.render(&kept));
            Ok(Step {
                value: QueryValue::Elements(kept),
                node,
            })
        })
    }
}
