//! Field types: how scalar models read and write concrete elements.
//!
//! The matcher resolves a literal against exactly one element by walking an
//! ordered table of field types; the first type whose `matches` accepts the
//! element wins. The standard table knows checkboxes, selects, and text
//! inputs, with a read-only text-content fallback for everything else.
//! Consumers can register their own types, which take precedence over the
//! standard ones.

use std::fmt;
use std::sync::Arc;

use crate::dom::{Checked, Dom, ElementHandle};
use crate::model::Literal;
use crate::result::{BuscarError, BuscarResult};

type MatchFn = dyn Fn(&dyn Dom, ElementHandle) -> bool + Send + Sync;
type ReadFn = dyn Fn(&dyn Dom, ElementHandle) -> Option<String> + Send + Sync;
type WriteFn = dyn Fn(&dyn Dom, ElementHandle, &Literal) -> BuscarResult<()> + Send + Sync;

/// One way of reading and writing a kind of element
#[derive(Clone)]
pub struct FieldType {
    name: String,
    matches: Arc<MatchFn>,
    read: Arc<ReadFn>,
    write: Option<Arc<WriteFn>>,
}

impl FieldType {
    /// Create a read-only field type
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        matches: impl Fn(&dyn Dom, ElementHandle) -> bool + Send + Sync + 'static,
        read: impl Fn(&dyn Dom, ElementHandle) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            matches: Arc::new(matches),
            read: Arc::new(read),
            write: None,
        }
    }

    /// Add write support
    #[must_use]
    pub fn with_write(
        mut self,
        write: impl Fn(&dyn Dom, ElementHandle, &Literal) -> BuscarResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.write = Some(Arc::new(write));
        self
    }

    /// The field type's name, used in error messages
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this type handles the element
    #[must_use]
    pub fn matches(&self, dom: &dyn Dom, element: ElementHandle) -> bool {
        (self.matches)(dom, element)
    }

    /// Read the element's current value as text
    #[must_use]
    pub fn read(&self, dom: &dyn Dom, element: ElementHandle) -> Option<String> {
        (self.read)(dom, element)
    }

    /// Whether this type can write values
    #[must_use]
    pub const fn can_write(&self) -> bool {
        self.write.is_some()
    }

    /// Write the literal into the element
    ///
    /// # Errors
    ///
    /// Returns a usage error for read-only types, or whatever the DOM
    /// capability reports
    pub fn write(
        &self,
        dom: &dyn Dom,
        element: ElementHandle,
        literal: &Literal,
    ) -> BuscarResult<()> {
        match &self.write {
            Some(write) => write(dom, element, literal),
            None => Err(BuscarError::usage(format!(
                "field type '{}' cannot set values",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldType")
            .field("name", &self.name)
            .field("writable", &self.write.is_some())
            .finish()
    }
}

/// The ordered field-type table; first match wins
#[derive(Debug, Clone)]
pub struct FieldTypes {
    types: Vec<FieldType>,
}

impl FieldTypes {
    /// The standard table: checkbox, select, text input, text content
    #[must_use]
    pub fn standard() -> Self {
        Self {
            types: vec![checkbox(), select(), text_input(), text_content()],
        }
    }

    /// An empty table
    #[must_use]
    pub const fn empty() -> Self {
        Self { types: Vec::new() }
    }

    /// Register a field type ahead of the existing ones
    pub fn register(&mut self, field: FieldType) {
        self.types.insert(0, field);
    }

    /// The first type matching the element
    #[must_use]
    pub fn first_match(&self, dom: &dyn Dom, element: ElementHandle) -> Option<&FieldType> {
        self.types.iter().find(|t| t.matches(dom, element))
    }
}

fn checkbox() -> FieldType {
    FieldType::new(
        "checkbox",
        |dom, el| dom.element_matches(el, "input[type=checkbox]"),
        |dom, el| {
            dom.checked(el).ok().map(|state| {
                match state {
                    Checked::On => "true",
                    Checked::Off => "false",
                    Checked::Indeterminate => "indeterminate",
                }
                .to_string()
            })
        },
    )
    .with_write(|dom, el, literal| {
        let Literal::Bool(desired) = literal else {
            return Err(BuscarError::usage(format!(
                "checkboxes are set with booleans, not {literal}"
            )));
        };
        let current = dom.checked(el)?;
        let currently_on = current == Checked::On;
        if currently_on != *desired {
            dom.click(el)?;
        }
        Ok(())
    })
}

fn select() -> FieldType {
    FieldType::new(
        "select",
        |dom, el| dom.element_matches(el, "select"),
        |dom, el| dom.input_value(el),
    )
    .with_write(|dom, el, literal| dom.select_option(el, &literal.written_text()))
}

fn text_input() -> FieldType {
    FieldType::new(
        "text input",
        |dom, el| dom.element_matches(el, "input, textarea"),
        |dom, el| dom.input_value(el),
    )
    .with_write(|dom, el, literal| {
        if let Literal::Pattern(pattern) = literal {
            return Err(BuscarError::usage(format!(
                "cannot type a regular expression /{}/ into a field",
                pattern.as_str()
            )));
        }
        dom.enter_text(el, &literal.written_text())
    })
}

fn text_content() -> FieldType {
    FieldType::new(
        "text content",
        |_dom, _el| true,
        |dom, el| Some(dom.element_inner_text(el).trim().to_string()),
    )
}
