//! Named query definitions: the vocabulary behind `find`.
//!
//! A definition maps a name to a resolver `(Query, args) -> Query`. The
//! registry travels with every query and is *cloned* — never shared — on
//! every builder call, so defining a name on one branch never leaks into
//! branches forked earlier. Named definitions and CSS share one textual
//! namespace; CSS is the fallback for anything that does not look like a
//! registered name or a serialized finder token.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::combinators::branch;
use crate::fields::{FieldType, FieldTypes};
use crate::query::Query;
use crate::result::{BuscarError, BuscarResult};
use crate::tokens::TokenRegistry;

/// A definition resolver: extends the query using the parsed arguments
pub type DefinitionFn =
    dyn Fn(Query, &[serde_json::Value]) -> BuscarResult<Query> + Send + Sync;

/// The per-query definition registry
#[derive(Clone)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<DefinitionFn>>,
    fields: FieldTypes,
    tokens: Arc<TokenRegistry>,
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("DefinitionRegistry")
            .field("definitions", &names)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl DefinitionRegistry {
    /// An empty registry with an empty field-type table
    #[must_use]
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
            fields: FieldTypes::empty(),
            tokens: Arc::new(TokenRegistry::new()),
        }
    }

    /// The standard registry: built-in `Button`/`Field` catalogs plus the
    /// standard field types
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            definitions: HashMap::new(),
            fields: FieldTypes::standard(),
            tokens: Arc::new(TokenRegistry::new()),
        };
        registry.install(
            "Button",
            Arc::new(|q: Query, args: &[serde_json::Value]| {
                let label = string_arg(args, 0, "Button")?;
                Ok(q.concat(vec![
                    {
                        let label = label.clone();
                        branch(move |s| s.find("button").containing(label.as_str()))
                    },
                    {
                        let label = label.clone();
                        branch(move |s| {
                            s.find(&format!(
                                "input[type=button][value='{label}'], input[type=submit][value='{label}']"
                            ))
                        })
                    },
                    branch(move |s| s.find("a").containing(label.as_str())),
                ]))
            }),
        );
        registry.install(
            "Field",
            Arc::new(|q: Query, args: &[serde_json::Value]| {
                let name = string_arg(args, 0, "Field")?;
                Ok(q.concat(vec![
                    {
                        let name = name.clone();
                        branch(move |s| s.find(&format!("input[aria-label='{name}']")))
                    },
                    {
                        let name = name.clone();
                        branch(move |s| s.find(&format!("input[placeholder='{name}']")))
                    },
                    branch(move |s| {
                        s.find("label").containing(name.as_str()).find("input")
                    }),
                ]))
            }),
        );
        registry
    }

    /// Install a definition.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered — duplicate definitions are
    /// static misuse.
    pub fn install(&mut self, name: &str, resolver: Arc<DefinitionFn>) {
        assert!(
            !self.definitions.contains_key(name),
            "definition '{name}' is already registered"
        );
        debug!(name, "installing definition");
        let _ = self.definitions.insert(name.to_string(), resolver);
    }

    /// Remove a definition; returns whether it existed
    pub fn remove(&mut self, name: &str) -> bool {
        self.definitions.remove(name).is_some()
    }

    /// Whether a definition exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// The field-type table
    #[must_use]
    pub const fn field_types(&self) -> &FieldTypes {
        &self.fields
    }

    /// Register a field type ahead of the existing ones
    pub fn register_field_type(&mut self, field: FieldType) {
        self.fields.register(field);
    }

    /// The shared finder/matcher token registry
    #[must_use]
    pub fn tokens(&self) -> Arc<TokenRegistry> {
        Arc::clone(&self.tokens)
    }

    /// Resolve a `find` selector against the registry.
    ///
    /// Returns `Ok(None)` when the selector should fall back to CSS.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a `Name(...)`-shaped selector with no
    /// registered resolver, malformed arguments, or a bad finder token.
    pub fn resolve_find(&self, query: &Query, selector: &str) -> BuscarResult<Option<Query>> {
        let trimmed = selector.trim();
        if trimmed.starts_with('{') {
            let parsed = self.tokens.parse_finder(trimmed)?;
            return (parsed.finder)(query.clone(), &parsed.args).map(Some);
        }
        if let Some((name, args_source)) = parse_call(trimmed) {
            let Some(resolver) = self.definitions.get(name) else {
                return Err(BuscarError::usage(format!(
                    "no definition named '{name}' is registered"
                )));
            };
            let args: Vec<serde_json::Value> = serde_json::from_str(&format!("[{args_source}]"))
                .map_err(|error| {
                    BuscarError::usage(format!(
                        "arguments of '{name}({args_source})' are not valid JSON: {error}"
                    ))
                })?;
            return resolver(query.clone(), &args).map(Some);
        }
        if bare_name(trimmed) {
            if let Some(resolver) = self.definitions.get(trimmed) {
                return resolver(query.clone(), &[]).map(Some);
            }
        }
        Ok(None)
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_call(selector: &str) -> Option<(&str, &str)> {
    static CALL: OnceLock<Regex> = OnceLock::new();
    let call = CALL
        .get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)$").expect("valid regex"));
    let captures = call.captures(selector)?;
    let name = captures.get(1)?.as_str();
    let args = captures.get(2)?.as_str();
    Some((name, args))
}

fn bare_name(selector: &str) -> bool {
    static NAME: OnceLock<Regex> = OnceLock::new();
    let name = NAME.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
    name.is_match(selector)
}

fn string_arg(args: &[serde_json::Value], index: usize, definition: &str) -> BuscarResult<String> {
    args.get(index)
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            BuscarError::usage(format!(
                "'{definition}' expects a string argument at position {index}"
            ))
        })
}

impl Query {
    /// Install a named definition; returns a new query.
    ///
    /// The registry is cloned, so queries forked before this call never see
    /// the new name.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered.
    #[must_use]
    pub fn define(
        &self,
        name: &str,
        resolver: impl Fn(Query, &[serde_json::Value]) -> BuscarResult<Query> + Send + Sync + 'static,
    ) -> Self {
        let mut next = self.clone();
        next.registry_mut().install(name, Arc::new(resolver));
        next
    }

    /// Remove a named definition; returns a new query
    #[must_use]
    pub fn undefine(&self, name: &str) -> Self {
        let mut next = self.clone();
        let _ = next.registry_mut().remove(name);
        next
    }

    /// Register a field type ahead of the standard ones; returns a new query
    #[must_use]
    pub fn add_field_type(&self, field: FieldType) -> Self {
        let mut next = self.clone();
        next.registry_mut().register_field_type(field);
        next
    }

    /// The shared finder/matcher token registry
    #[must_use]
    pub fn token_registry(&self) -> Arc<TokenRegistry> {
        self.registry().tokens()
    }
}
