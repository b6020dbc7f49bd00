//! The injected DOM capability boundary.
//!
//! The engine never assumes an ambient document. Everything it knows about
//! the page flows through the [`Dom`] trait, and elements are referred to by
//! opaque [`ElementHandle`] values whose identity drives combinator
//! de-duplication. Swapping the implementation (a real browser bridge, the
//! in-memory [`crate::mock::FakeDom`], an embedding adapter) never touches
//! the query engine.

use serde::{Deserialize, Serialize};

use crate::result::BuscarResult;

/// Opaque handle to a live element.
///
/// Handles are cheap to copy and compare; two handles are the same element
/// exactly when they are equal. The engine never inspects the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(u64);

impl ElementHandle {
    /// Create a handle from a raw id minted by a [`Dom`] implementation
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id, for [`Dom`] implementations mapping handles to nodes
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Tri-state checked value for checkboxes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checked {
    /// Checked
    On,
    /// Unchecked
    Off,
    /// Indeterminate (set from script, neither on nor off)
    Indeterminate,
}

/// Options applied when selecting elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectorOptions {
    /// Only return elements that are currently visible
    pub visible_only: bool,
}

/// The DOM capability consumed by the engine.
///
/// Implementations must be cheap to call repeatedly: the retry scheduler
/// re-runs whole pipelines against these methods every poll interval.
pub trait Dom: Send + Sync {
    /// The document scope queries start from
    fn root(&self) -> ElementHandle;

    /// All elements under `scope` matching a CSS selector, in document order
    fn query_selector_all(
        &self,
        scope: ElementHandle,
        css: &str,
        options: SelectorOptions,
    ) -> Vec<ElementHandle>;

    /// Whether the element matches a CSS selector
    fn element_matches(&self, element: ElementHandle, css: &str) -> bool;

    /// The element's rendered text content
    fn element_inner_text(&self, element: ElementHandle) -> String;

    /// Whether the element is currently visible
    fn element_visible(&self, element: ElementHandle) -> bool;

    /// The element's lowercase tag name
    fn tag_name(&self, element: ElementHandle) -> String;

    /// Simulate a click
    ///
    /// # Errors
    ///
    /// Returns an error if the element no longer exists or cannot be clicked
    fn click(&self, element: ElementHandle) -> BuscarResult<()>;

    /// Submit the form the element belongs to
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not inside a form
    fn submit(&self, element: ElementHandle) -> BuscarResult<()>;

    /// Simulate typing into a text field, replacing its value
    ///
    /// # Errors
    ///
    /// Returns an error if the element does not accept text input
    fn enter_text(&self, element: ElementHandle, text: &str) -> BuscarResult<()>;

    /// Choose the option with the given visible text from a select
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not a select or has no such option
    fn select_option(&self, select: ElementHandle, option: &str) -> BuscarResult<()>;

    /// Checked state of a checkbox
    ///
    /// # Errors
    ///
    /// Returns an error if the element has no checked state
    fn checked(&self, element: ElementHandle) -> BuscarResult<Checked>;

    /// Set an input's value directly, without simulating keystrokes
    ///
    /// # Errors
    ///
    /// Returns an error if the element has no value property
    fn set_input_value(&self, element: ElementHandle, value: &str) -> BuscarResult<()>;

    /// Current value of an input, textarea, or select
    fn input_value(&self, element: ElementHandle) -> Option<String>;

    /// Short HTML-ish rendering of an element, used by diagnostics.
    ///
    /// The default shows the tag plus a trimmed slice of the inner text.
    fn describe_element(&self, element: ElementHandle) -> String {
        let tag = self.tag_name(element);
        let text = self.element_inner_text(element);
        let text = text.trim();
        if text.is_empty() {
            format!("<{tag}/>")
        } else if text.len() > 40 {
            let cut = text
                .char_indices()
                .take_while(|(i, _)| *i < 40)
                .last()
                .map_or(0, |(i, c)| i + c.len_utf8());
            format!("<{tag}>{}...</{tag}>", &text[..cut])
        } else {
            format!("<{tag}>{text}</{tag}>")
        }
    }
}

/// Render an element collection for diagnostic nodes
#[must_use]
pub(crate) fn render_elements(dom: &dyn Dom, elements: &[ElementHandle]) -> String {
    match elements.len() {
        0 => "0 elements".to_string(),
        n => {
            let shown: Vec<String> = elements
                .iter()
                .take(5)
                .map(|el| dom.describe_element(*el))
                .collect();
            let suffix = if n > 5 { ", ..." } else { "" };
            format!("{n} elements: {}{suffix}", shown.join(", "))
        }
    }
}
