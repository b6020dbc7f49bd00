//! Buscar: a retrying DOM query and structural assertion engine.
//!
//! Buscar describes *what* to find or assert in a UI as an immutable,
//! composable [`Query`] value. Nothing touches the page until the query is
//! resolved; resolution polls the page until the expectations hold or a
//! timeout expires, and a failure renders a diagnostic tree of what every
//! pipeline step actually found.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        BUSCAR Architecture                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌───────────┐  │
//! │  │ Query     │──►│ Retry      │──►│ Injected  │   │ Diagnostic│  │
//! │  │ Pipeline  │   │ Scheduler  │   │ Dom       │──►│ Tree      │  │
//! │  │ (builder) │   │ (poll)     │   │ capability│   │ (render)  │  │
//! │  └───────────┘   └────────────┘   └───────────┘   └───────────┘  │
//! │       ▲                                                          │
//! │  ┌────┴──────────────┬───────────────────┬────────────────────┐  │
//! │  │ Combinators       │ Structural        │ Definition +       │  │
//! │  │ concat/firstOf/   │ Model Matcher     │ Token Registries   │  │
//! │  │ detect/containing │ set/shouldContain │ find vocabulary    │  │
//! │  └───────────────────┴───────────────────┴────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use buscar::mock::{el, FakeDom};
//! use buscar::{model, scope, Dom};
//!
//! let dom = FakeDom::new();
//! let form = dom.append(dom.root(), el("form").class("login"));
//! dom.append(form, el("input").attr("type", "text").class("name"));
//!
//! let shared: Arc<dyn Dom> = Arc::new(dom.clone());
//! scope(shared)
//!     .find("form.login")
//!     .set(model!({ ".name": "bob" }))
//!     .resolve()
//!     .expect("the form fills in");
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod combinators;
pub mod diagnostic;
pub mod dom;
pub mod fields;
pub mod matcher;

/// In-memory DOM for hermetic tests.
///
/// Not gated behind `cfg(test)`: consumers test their own finders and page
/// vocabularies against it.
pub mod mock;
pub mod model;
pub mod query;
pub mod registry;
pub mod result;
pub mod retry;
pub mod tokens;

pub use combinators::{branch, Branch};
pub use diagnostic::{BranchOutcome, Diagnostic, KeyedOutcome};
pub use dom::{Checked, Dom, ElementHandle, SelectorOptions};
pub use fields::{FieldType, FieldTypes};
pub use model::{Literal, Model, ModelFn};
pub use query::{scope, ExecContext, Query, QueryOptions, QueryValue, Resolution, Settings, Step};
pub use registry::{DefinitionFn, DefinitionRegistry};
pub use result::{BuscarError, BuscarResult};
pub use retry::{
    Clock, Immediate, Poll, RetrySettings, Scheduler, SystemClock, TestClock,
    DEFAULT_INTERVAL_MS, DEFAULT_TIMEOUT_MS,
};
pub use tokens::{
    MultiFinder, ParsedToken, Token, TokenArg, TokenHandle, TokenKind, TokenRegistry,
};

/// Convenience re-exports for test code
pub mod prelude {
    pub use crate::combinators::branch;
    pub use crate::dom::Dom;
    pub use crate::model::Model;
    pub use crate::query::{scope, Query, Settings};
    pub use crate::result::{BuscarError, BuscarResult};
}

#[cfg(test)]
mod end_to_end_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::mock::{el, FakeDom};
    use crate::query::scope;
    use crate::{model, Dom};

    #[test]
    fn test_query_converges_on_late_inserted_element() {
        let dom = FakeDom::new();
        let shared: Arc<dyn Dom> = Arc::new(dom.clone());

        // the .name input does not exist yet; it appears 50ms in
        let writer = {
            let dom = dom.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                let _ = dom.append(
                    dom.root(),
                    el("input").attr("type", "text").class("name").value(""),
                );
            })
        };

        scope(shared)
            .find(".name")
            .should_have("")
            .resolve()
            .expect("resolves once the element is inserted");
        writer.join().expect("writer thread finishes");
    }

    #[test]
    fn test_full_flow_finds_fills_and_submits() {
        let dom = FakeDom::new();
        let shared: Arc<dyn Dom> = Arc::new(dom.clone());

        let form = dom.append(dom.root(), el("form").class("login"));
        let name = dom.append(form, el("input").attr("type", "text").class("name"));
        let remember = dom.append(
            form,
            el("input").attr("type", "checkbox").class("remember"),
        );
        let button = dom.append(form, el("button"));
        dom.set_text(button, "Sign in");

        let page = scope(shared);
        page.find("form.login")
            .set(model!({ ".name": "bob", ".remember": true }))
            .resolve()
            .expect("the form fills in");
        page.find(r#"Button("Sign in")"#)
            .click()
            .resolve()
            .expect("the button is clicked");

        assert_eq!(dom.value_of(name), Some("bob".to_string()));
        assert_eq!(dom.checked_of(remember), Some(true));
        assert_eq!(dom.events_for(button), vec!["click".to_string()]);
    }

    #[test]
    fn test_timeout_failure_renders_the_whole_path() {
        let dom = FakeDom::new();
        let shared: Arc<dyn Dom> = Arc::new(dom.clone());
        dom.append(dom.root(), el("form").class("login"));

        let err = scope(shared)
            .find("form.login")
            .find(".name")
            .should_have("bob")
            .with_timeout(Duration::from_millis(50))
            .resolve()
            .expect_err("the input never appears");
        let rendered = err.to_string();
        assert!(rendered.contains("(found: "));
        assert!(rendered.contains("find('form.login')"));
        assert!(rendered.contains("find('.name')"));
    }
}

#[cfg(test)]
mod property_tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use crate::mock::FakeDom;
    use crate::query::scope;
    use crate::Dom;

    proptest! {
        /// Builder calls never mutate the query they are called on.
        #[test]
        fn prop_builders_leave_parents_unchanged(selectors in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
            let shared: Arc<dyn Dom> = Arc::new(FakeDom::new());
            let mut query = scope(shared);
            for selector in selectors {
                let before = query.transform_count();
                let child = query.find(&selector);
                prop_assert_eq!(query.transform_count(), before);
                prop_assert_eq!(child.transform_count(), before + 1);
                query = child;
            }
        }
    }
}
