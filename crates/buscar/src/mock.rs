//! In-memory DOM for testing the engine without a browser.
//!
//! [`FakeDom`] implements the [`Dom`] capability over a node tree behind a
//! lock, so tests can mutate the page from another thread while a query
//! polls — the same shape real pages have during rendering. It understands a
//! small CSS subset: tag, `#id`, `.class`, `[attr]`, `[attr=value]` (quoted
//! or bare), compound selectors, the descendant combinator, and comma
//! groups.
//!
//! Form semantics are deliberately simple but honest: clicking a checkbox
//! toggles it, entering text replaces a value, selecting an option updates
//! the select's value, and every simulated interaction lands in a per-node
//! event log tests can assert against.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::dom::{Checked, Dom, ElementHandle, SelectorOptions};
use crate::result::{BuscarError, BuscarResult};

/// Builder for a node to insert into a [`FakeDom`]
#[derive(Debug, Clone)]
pub struct ElementSpec {
    tag: String,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    text: String,
    value: Option<String>,
    checked: Option<bool>,
    visible: bool,
}

/// Start building an element with the given tag
#[must_use]
pub fn el(tag: &str) -> ElementSpec {
    ElementSpec {
        tag: tag.to_ascii_lowercase(),
        classes: Vec::new(),
        attrs: HashMap::new(),
        text: String::new(),
        value: None,
        checked: None,
        visible: true,
    }
}

impl ElementSpec {
    /// Add a class
    #[must_use]
    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        let _ = self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the element's own text
    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Set the form value
    #[must_use]
    pub fn value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// Set the checked state
    #[must_use]
    pub const fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    /// Make the element invisible
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<u64>,
    children: Vec<u64>,
    tag: String,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    text: String,
    value: Option<String>,
    checked: Option<Checked>,
    visible: bool,
    events: Vec<String>,
}

#[derive(Debug)]
struct TreeState {
    nodes: HashMap<u64, Node>,
    next_id: u64,
    root: u64,
}

/// An in-memory DOM; cloning shares the underlying tree
#[derive(Debug, Clone)]
pub struct FakeDom {
    state: Arc<RwLock<TreeState>>,
}

impl Default for FakeDom {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDom {
    /// Create a document with an empty `<body>` root
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let _ = nodes.insert(
            0,
            Node {
                parent: None,
                children: Vec::new(),
                tag: "body".to_string(),
                classes: Vec::new(),
                attrs: HashMap::new(),
                text: String::new(),
                value: None,
                checked: None,
                visible: true,
                events: Vec::new(),
            },
        );
        Self {
            state: Arc::new(RwLock::new(TreeState {
                nodes,
                next_id: 1,
                root: 0,
            })),
        }
    }

    /// Insert a node under `parent`; returns its handle
    pub fn append(&self, parent: ElementHandle, spec: ElementSpec) -> ElementHandle {
        let mut state = self.state.write().expect("fake dom lock");
        let id = state.next_id;
        state.next_id += 1;

        let is_form_field = matches!(spec.tag.as_str(), "input" | "textarea" | "select");
        let is_checkbox =
            spec.tag == "input" && spec.attrs.get("type").map(String::as_str) == Some("checkbox");
        let value = spec
            .value
            .or_else(|| spec.attrs.get("value").cloned())
            .or_else(|| is_form_field.then(String::new));
        let checked = if is_checkbox {
            Some(if spec.checked.unwrap_or(false) {
                Checked::On
            } else {
                Checked::Off
            })
        } else {
            None
        };

        let _ = state.nodes.insert(
            id,
            Node {
                parent: Some(parent.raw()),
                children: Vec::new(),
                tag: spec.tag,
                classes: spec.classes,
                attrs: spec.attrs,
                text: spec.text,
                value,
                checked,
                visible: spec.visible,
                events: Vec::new(),
            },
        );
        if let Some(parent_node) = state.nodes.get_mut(&parent.raw()) {
            parent_node.children.push(id);
        }
        ElementHandle::new(id)
    }

    /// Remove a node and its subtree
    pub fn remove(&self, element: ElementHandle) {
        let mut state = self.state.write().expect("fake dom lock");
        let parent = state.nodes.get(&element.raw()).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(parent_node) = state.nodes.get_mut(&parent) {
                parent_node.children.retain(|c| *c != element.raw());
            }
        }
        let mut doomed = vec![element.raw()];
        while let Some(id) = doomed.pop() {
            if let Some(node) = state.nodes.remove(&id) {
                doomed.extend(node.children);
            }
        }
    }

    /// Replace a node's own text
    pub fn set_text(&self, element: ElementHandle, text: &str) {
        let mut state = self.state.write().expect("fake dom lock");
        if let Some(node) = state.nodes.get_mut(&element.raw()) {
            node.text = text.to_string();
        }
    }

    /// Replace a node's form value
    pub fn set_value(&self, element: ElementHandle, value: &str) {
        let mut state = self.state.write().expect("fake dom lock");
        if let Some(node) = state.nodes.get_mut(&element.raw()) {
            node.value = Some(value.to_string());
        }
    }

    /// Change a node's visibility
    pub fn set_visible(&self, element: ElementHandle, visible: bool) {
        let mut state = self.state.write().expect("fake dom lock");
        if let Some(node) = state.nodes.get_mut(&element.raw()) {
            node.visible = visible;
        }
    }

    /// The node's form value, if any
    #[must_use]
    pub fn value_of(&self, element: ElementHandle) -> Option<String> {
        let state = self.state.read().expect("fake dom lock");
        state.nodes.get(&element.raw()).and_then(|n| n.value.clone())
    }

    /// The node's checked state, if it has one
    #[must_use]
    pub fn checked_of(&self, element: ElementHandle) -> Option<bool> {
        let state = self.state.read().expect("fake dom lock");
        state
            .nodes
            .get(&element.raw())
            .and_then(|n| n.checked)
            .map(|c| c == Checked::On)
    }

    /// The simulated events recorded on the node, in order
    #[must_use]
    pub fn events_for(&self, element: ElementHandle) -> Vec<String> {
        let state = self.state.read().expect("fake dom lock");
        state
            .nodes
            .get(&element.raw())
            .map(|n| n.events.clone())
            .unwrap_or_default()
    }

    fn with_node<T>(&self, element: ElementHandle, f: impl FnOnce(&Node) -> T) -> Option<T> {
        let state = self.state.read().expect("fake dom lock");
        state.nodes.get(&element.raw()).map(f)
    }

    fn record(&self, element: ElementHandle, event: &str) -> BuscarResult<()> {
        let mut state = self.state.write().expect("fake dom lock");
        let node = state
            .nodes
            .get_mut(&element.raw())
            .ok_or_else(|| BuscarError::dom(format!("element {} is gone", element.raw())))?;
        node.events.push(event.to_string());
        Ok(())
    }
}

impl Dom for FakeDom {
    fn root(&self) -> ElementHandle {
        let state = self.state.read().expect("fake dom lock");
        ElementHandle::new(state.root)
    }

    fn query_selector_all(
        &self,
        scope: ElementHandle,
        css: &str,
        options: SelectorOptions,
    ) -> Vec<ElementHandle> {
        let state = self.state.read().expect("fake dom lock");
        let selectors = parse_selector_list(css);
        let mut hits = Vec::new();
        let mut stack: Vec<u64> = state
            .nodes
            .get(&scope.raw())
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            if let Some(node) = state.nodes.get(&id) {
                let matched = selectors.iter().any(|s| selector_matches(&state, id, s));
                if matched && (!options.visible_only || effectively_visible(&state, id)) {
                    hits.push(ElementHandle::new(id));
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        hits
    }

    fn element_matches(&self, element: ElementHandle, css: &str) -> bool {
        let state = self.state.read().expect("fake dom lock");
        parse_selector_list(css)
            .iter()
            .any(|s| selector_matches(&state, element.raw(), s))
    }

    fn element_inner_text(&self, element: ElementHandle) -> String {
        let state = self.state.read().expect("fake dom lock");
        let mut segments = Vec::new();
        collect_text(&state, element.raw(), &mut segments);
        segments.join(" ")
    }

    fn element_visible(&self, element: ElementHandle) -> bool {
        let state = self.state.read().expect("fake dom lock");
        effectively_visible(&state, element.raw())
    }

    fn tag_name(&self, element: ElementHandle) -> String {
        self.with_node(element, |n| n.tag.clone()).unwrap_or_default()
    }

    fn click(&self, element: ElementHandle) -> BuscarResult<()> {
        self.record(element, "click")?;
        let mut state = self.state.write().expect("fake dom lock");
        if let Some(node) = state.nodes.get_mut(&element.raw()) {
            if let Some(checked) = node.checked {
                node.checked = Some(match checked {
                    Checked::On => Checked::Off,
                    Checked::Off | Checked::Indeterminate => Checked::On,
                });
            }
        }
        Ok(())
    }

    fn submit(&self, element: ElementHandle) -> BuscarResult<()> {
        let form = {
            let state = self.state.read().expect("fake dom lock");
            let mut current = Some(element.raw());
            let mut found = None;
            while let Some(id) = current {
                let Some(node) = state.nodes.get(&id) else { break };
                if node.tag == "form" {
                    found = Some(id);
                    break;
                }
                current = node.parent;
            }
            found
        };
        let form =
            form.ok_or_else(|| BuscarError::dom("element is not inside a form".to_string()))?;
        self.record(ElementHandle::new(form), "submit")
    }

    fn enter_text(&self, element: ElementHandle, text: &str) -> BuscarResult<()> {
        self.record(element, &format!("type('{text}')"))?;
        self.set_value(element, text);
        Ok(())
    }

    fn select_option(&self, select: ElementHandle, option: &str) -> BuscarResult<()> {
        self.record(select, &format!("select('{option}')"))?;
        let mut state = self.state.write().expect("fake dom lock");
        let children = state
            .nodes
            .get(&select.raw())
            .map(|n| n.children.clone())
            .unwrap_or_default();
        let chosen = children.iter().copied().find(|id| {
            state
                .nodes
                .get(id)
                .is_some_and(|n| n.tag == "option" && n.text.trim() == option)
        });
        let Some(chosen) = chosen else {
            return Err(BuscarError::dom(format!("no option '{option}' in select")));
        };
        for id in children {
            if let Some(node) = state.nodes.get_mut(&id) {
                if id == chosen {
                    let _ = node.attrs.insert("selected".to_string(), String::new());
                } else {
                    let _ = node.attrs.remove("selected");
                }
            }
        }
        if let Some(node) = state.nodes.get_mut(&select.raw()) {
            node.value = Some(option.to_string());
        }
        Ok(())
    }

    fn checked(&self, element: ElementHandle) -> BuscarResult<Checked> {
        self.with_node(element, |n| n.checked)
            .flatten()
            .ok_or_else(|| BuscarError::dom("element has no checked state".to_string()))
    }

    fn set_input_value(&self, element: ElementHandle, value: &str) -> BuscarResult<()> {
        let has_value = self
            .with_node(element, |n| n.value.is_some())
            .unwrap_or(false);
        if !has_value {
            return Err(BuscarError::dom("element has no value".to_string()));
        }
        self.set_value(element, value);
        Ok(())
    }

    fn input_value(&self, element: ElementHandle) -> Option<String> {
        self.value_of(element)
    }
}

fn effectively_visible(state: &TreeState, id: u64) -> bool {
    let mut current = Some(id);
    while let Some(id) = current {
        let Some(node) = state.nodes.get(&id) else {
            return false;
        };
        if !node.visible {
            return false;
        }
        current = node.parent;
    }
    true
}

fn collect_text(state: &TreeState, id: u64, segments: &mut Vec<String>) {
    if let Some(node) = state.nodes.get(&id) {
        let own = node.text.trim();
        if !own.is_empty() {
            segments.push(own.to_string());
        }
        for child in &node.children {
            collect_text(state, *child, segments);
        }
    }
}

// ----------------------------------------------------------------------
// CSS subset
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Tag(String),
    Id(String),
    Class(String),
    AttrPresent(String),
    AttrEquals(String, String),
}

type Compound = Vec<Part>;

/// A selector: compounds left to right, joined by descendant combinators
type Selector = Vec<Compound>;

fn parse_selector_list(css: &str) -> Vec<Selector> {
    css.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_selector)
        .collect()
}

fn parse_selector(selector: &str) -> Selector {
    selector
        .split_whitespace()
        .map(parse_compound)
        .collect()
}

fn parse_compound(compound: &str) -> Compound {
    let mut parts = Vec::new();
    let chars: Vec<char> = compound.chars().collect();
    let mut i = 0;

    let ident = |chars: &[char], start: usize| -> (String, usize) {
        let mut end = start;
        while end < chars.len()
            && (chars[end].is_alphanumeric() || chars[end] == '-' || chars[end] == '_')
        {
            end += 1;
        }
        (chars[start..end].iter().collect(), end)
    };

    if i < chars.len() && (chars[i].is_alphabetic() || chars[i] == '_') {
        let (tag, next) = ident(&chars, i);
        parts.push(Part::Tag(tag.to_ascii_lowercase()));
        i = next;
    }
    while i < chars.len() {
        match chars[i] {
            '#' => {
                let (id, next) = ident(&chars, i + 1);
                parts.push(Part::Id(id));
                i = next;
            }
            '.' => {
                let (class, next) = ident(&chars, i + 1);
                parts.push(Part::Class(class));
                i = next;
            }
            '[' => {
                let close = chars[i..].iter().position(|c| *c == ']').map(|p| i + p);
                let Some(close) = close else { break };
                let body: String = chars[i + 1..close].iter().collect();
                match body.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim_matches(|c| c == '\'' || c == '"');
                        parts.push(Part::AttrEquals(
                            name.trim().to_string(),
                            value.to_string(),
                        ));
                    }
                    None => parts.push(Part::AttrPresent(body.trim().to_string())),
                }
                i = close + 1;
            }
            _ => break,
        }
    }
    parts
}

fn compound_matches(state: &TreeState, id: u64, compound: &Compound) -> bool {
    let Some(node) = state.nodes.get(&id) else {
        return false;
    };
    compound.iter().all(|part| match part {
        Part::Tag(tag) => node.tag == *tag,
        Part::Id(id_attr) => node.attrs.get("id").map(String::as_str) == Some(id_attr.as_str()),
        Part::Class(class) => node.classes.iter().any(|c| c == class),
        Part::AttrPresent(name) => node.attrs.contains_key(name),
        Part::AttrEquals(name, value) => {
            node.attrs.get(name).map(String::as_str) == Some(value.as_str())
        }
    })
}

fn selector_matches(state: &TreeState, id: u64, selector: &Selector) -> bool {
    let Some((rightmost, ancestors)) = selector.split_last() else {
        return false;
    };
    if !compound_matches(state, id, rightmost) {
        return false;
    }
    // remaining compounds must match an ancestor chain, right to left
    let mut current = state.nodes.get(&id).and_then(|n| n.parent);
    for compound in ancestors.iter().rev() {
        loop {
            let Some(id) = current else { return false };
            current = state.nodes.get(&id).and_then(|n| n.parent);
            if compound_matches(state, id, compound) {
                break;
            }
        }
    }
    true
}
