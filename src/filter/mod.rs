//! Test filters
//!
//! A `TestFilter` is a boolean predicate tree over test nodes. Filters are
//! built from CLI options, from the `--where` selection language, or from
//! their XML document form, and travel between processes as that XML text.
//!
//! Matching is scoped: a name or id filter also selects everything below the
//! named suite, and a category declared on a suite applies to its children.
//! Explicit nodes are only taken when matched directly, never through that
//! inheritance and never through negation or the empty filter.

mod builder;
mod selection;
mod xml;

pub use builder::FilterOptions;
pub use selection::parse_selection;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::TestNode;

/// Errors raised while constructing a filter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("Malformed filter document: {0}")]
    Malformed(String),

    #[error("Unknown filter element <{0}>")]
    UnknownElement(String),

    #[error("<not> requires exactly one child, found {0}")]
    NotArity(usize),

    #[error("Filter element <{0}> has no value")]
    EmptyValue(String),

    #[error("Invalid selection expression at position {position}: {message}")]
    Selection { position: usize, message: String },

    #[error("Unknown filter option '{0}'")]
    UnknownOption(String),
}

/// Predicate tree selecting the tests that take part in a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TestFilter {
    /// Selects everything
    #[default]
    Empty,
    /// Fully qualified test names
    Name(Vec<String>),
    Category(Vec<String>),
    Id(Vec<String>),
    And(Vec<TestFilter>),
    Or(Vec<TestFilter>),
    Not(Box<TestFilter>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Only the node's own name, id and categories, no negation
    Direct,
    /// Also what the node inherits from enclosing suites
    Inherited,
}

impl TestFilter {
    pub fn names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        TestFilter::Name(names.into_iter().map(Into::into).collect())
    }

    pub fn categories<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> Self {
        TestFilter::Category(categories.into_iter().map(Into::into).collect())
    }

    pub fn ids<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        TestFilter::Id(ids.into_iter().map(Into::into).collect())
    }

    pub fn negate(filter: TestFilter) -> Self {
        TestFilter::Not(Box::new(filter))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TestFilter::Empty)
    }

    /// Whether `node` is selected, taking enclosing suites into account
    pub fn matches(&self, node: &TestNode) -> bool {
        self.eval(node, Scope::Inherited)
    }

    /// Whether `node` is selected by its own identity alone. This is the
    /// match explicit nodes need: the empty filter and negations never
    /// match directly, and an `And` needs at least one direct member.
    pub fn matches_directly(&self, node: &TestNode) -> bool {
        self.eval(node, Scope::Direct)
    }

    /// True when `node` matches or any descendant can be selected.
    /// Used to decide whether a suite is entered at all.
    pub fn pass(&self, node: &TestNode) -> bool {
        self.matches(node) || self.match_descendant(node)
    }

    /// Whether some descendant of `node` is selected. Does not look below
    /// explicit children.
    pub fn match_descendant(&self, node: &TestNode) -> bool {
        node.children.iter().any(|child| {
            self.selects(child) || (!child.is_explicit() && self.match_descendant(child))
        })
    }

    /// Selection rule for a single node: explicit nodes need a direct match
    pub fn selects(&self, node: &TestNode) -> bool {
        if node.is_explicit() {
            self.matches_directly(node)
        } else {
            self.matches(node)
        }
    }

    /// Whether a run or explore walk descends into the suite `node`.
    /// Besides `pass`, a directly matched node anywhere below opens the
    /// way through explicit suites on its path.
    pub fn enters(&self, node: &TestNode) -> bool {
        let own = if node.is_explicit() {
            self.matches_directly(node)
        } else {
            self.pass(node)
        };
        own || self.matches_descendant_directly(node)
    }

    fn matches_descendant_directly(&self, node: &TestNode) -> bool {
        node.children
            .iter()
            .any(|child| self.matches_directly(child) || self.matches_descendant_directly(child))
    }

    fn eval(&self, node: &TestNode, scope: Scope) -> bool {
        match self {
            TestFilter::Empty => scope == Scope::Inherited,
            TestFilter::Name(names) => names.iter().any(|name| {
                node.full_name == *name
                    || (scope == Scope::Inherited && is_qualified_by(&node.full_name, name))
            }),
            TestFilter::Category(categories) => match scope {
                Scope::Direct => node.categories.iter().any(|c| categories.contains(c)),
                Scope::Inherited => node.all_categories().any(|c| categories.contains(c)),
            },
            TestFilter::Id(ids) => ids.iter().any(|id| {
                node.id == *id || (scope == Scope::Inherited && node.ancestor_ids.contains(id))
            }),
            TestFilter::And(filters) => match scope {
                Scope::Inherited => filters.iter().all(|f| f.matches(node)),
                Scope::Direct => {
                    filters.iter().all(|f| f.matches(node))
                        && filters.iter().any(|f| f.matches_directly(node))
                }
            },
            TestFilter::Or(filters) => filters.iter().any(|f| f.eval(node, scope)),
            TestFilter::Not(inner) => {
                scope == Scope::Inherited && !node.is_explicit() && !inner.matches(node)
            }
        }
    }
}

/// `Calc.Add.One` is qualified by `Calc.Add` and `Calc`, not by `Calc.Ad`
fn is_qualified_by(full_name: &str, prefix: &str) -> bool {
    full_name.len() > prefix.len()
        && full_name.starts_with(prefix)
        && full_name.as_bytes()[prefix.len()] == b'.'
}

impl std::fmt::Display for TestFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_xml())
    }
}

impl From<TestFilter> for String {
    fn from(filter: TestFilter) -> Self {
        filter.to_xml()
    }
}

impl TryFrom<String> for TestFilter {
    type Error = FilterParseError;

    fn try_from(xml: String) -> Result<Self, Self::Error> {
        TestFilter::from_xml(&xml)
    }
}
