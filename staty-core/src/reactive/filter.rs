//! Action-name filters.
//!
//! A subscriber with a filter is only collected by actions whose name the
//! filter accepts. Pattern-based filters only ever match string names;
//! symbol names (including the internal auto-action) match by identity
//! through [`Filter::Symbol`] or through a predicate.

use std::fmt;
use std::rc::Rc;

use regex::Regex;

use super::action::{ActionName, Symbol};

/// Predicate over action names.
pub type NamePredicate = Rc<dyn Fn(&ActionName) -> bool>;

/// Selects which actions notify a subscriber.
#[derive(Clone)]
pub enum Filter {
    /// Arbitrary predicate over the name.
    Predicate(NamePredicate),
    /// One pattern that the name must match.
    Pattern(Regex),
    /// Any of several patterns.
    Patterns(Vec<Regex>),
    /// Include/exclude lists. An exclude match always wins; an empty include
    /// list accepts every name that is not excluded.
    Rules {
        /// Names that are accepted.
        include: Vec<Regex>,
        /// Names that are rejected.
        exclude: Vec<Regex>,
    },
    /// Exactly this symbol.
    Symbol(Symbol),
}

impl Filter {
    /// Build a predicate filter.
    pub fn predicate(f: impl Fn(&ActionName) -> bool + 'static) -> Self {
        Filter::Predicate(Rc::new(f))
    }

    /// Build a single-pattern filter.
    pub fn pattern(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Filter::Pattern)
    }

    /// Build an any-of-patterns filter.
    pub fn patterns<'a>(sources: impl IntoIterator<Item = &'a str>) -> Result<Self, regex::Error> {
        sources
            .into_iter()
            .map(Regex::new)
            .collect::<Result<Vec<_>, _>>()
            .map(Filter::Patterns)
    }

    /// Build an include/exclude filter.
    pub fn rules<'a>(
        include: impl IntoIterator<Item = &'a str>,
        exclude: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, regex::Error> {
        let include = include
            .into_iter()
            .map(Regex::new)
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = exclude
            .into_iter()
            .map(Regex::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Filter::Rules { include, exclude })
    }

    /// Whether an action with this name should notify the subscriber.
    pub fn matches(&self, name: &ActionName) -> bool {
        match (self, name) {
            (Filter::Predicate(f), _) => f(name),
            (Filter::Symbol(expected), ActionName::Symbol(actual)) => expected == actual,
            (Filter::Symbol(_), ActionName::Named(_)) => false,
            (_, ActionName::Symbol(_)) => false,
            (Filter::Pattern(re), ActionName::Named(n)) => re.is_match(n),
            (Filter::Patterns(res), ActionName::Named(n)) => res.iter().any(|re| re.is_match(n)),
            (Filter::Rules { include, exclude }, ActionName::Named(n)) => {
                if exclude.iter().any(|re| re.is_match(n)) {
                    return false;
                }
                include.is_empty() || include.iter().any(|re| re.is_match(n))
            }
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Predicate(_) => f.write_str("Filter::Predicate(..)"),
            Filter::Pattern(re) => write!(f, "Filter::Pattern({})", re.as_str()),
            Filter::Patterns(res) => f
                .debug_tuple("Filter::Patterns")
                .field(&res.iter().map(Regex::as_str).collect::<Vec<_>>())
                .finish(),
            Filter::Rules { include, exclude } => f
                .debug_struct("Filter::Rules")
                .field("include", &include.iter().map(Regex::as_str).collect::<Vec<_>>())
                .field("exclude", &exclude.iter().map(Regex::as_str).collect::<Vec<_>>())
                .finish(),
            Filter::Symbol(s) => write!(f, "Filter::Symbol({s})"),
        }
    }
}
