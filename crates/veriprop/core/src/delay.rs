// Veriprop
// Copyright (C) 2025 Veriprop Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Causes of delay: the traceable "not yet known" markers of the analyser.
//!
//! A delayed value carries a non-empty set of causes, each a reason tag plus
//! the location it originated from and, where meaningful, the variable it is
//! about. Combining delayed values unions their cause sets; nothing is ever
//! dropped (up to a generous bound that keeps diagnostics and break-delay
//! fingerprints finite on pathological inputs).

use crate::location::Location;
use crate::variable::Variable;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Upper bound on the size of a cause set after union.
const MAX_CAUSES: usize = 40;

/// Reason tags for delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cause {
    /// Awaiting the initial value of a variable.
    InitialValue,
    /// A branch condition could not be evaluated yet.
    Condition,
    /// The values of a field are not yet known.
    FieldValues,
    /// A deliberate break of an initialisation cycle.
    BreakInit,
    /// Whether a block executes is not yet known.
    Execution,
    /// Aliasing information is not yet complete.
    Linking,
    /// A context property of another variable is still open.
    ContextProperty,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cause::InitialValue => "initial_value",
            Cause::Condition => "condition",
            Cause::FieldValues => "field_values",
            Cause::BreakInit => "break_init",
            Cause::Execution => "execution",
            Cause::Linking => "linking",
            Cause::ContextProperty => "context_property",
        };
        write!(f, "{s}")
    }
}

/// One cause of delay: reason, origin, optional variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CauseOfDelay {
    pub cause: Cause,
    pub location: Location,
    pub variable: Option<Variable>,
}

impl CauseOfDelay {
    pub fn new(cause: Cause, location: Location) -> Self {
        Self {
            cause,
            location,
            variable: None,
        }
    }

    pub fn variable(cause: Cause, location: Location, variable: Variable) -> Self {
        Self {
            cause,
            location,
            variable: Some(variable),
        }
    }
}

impl PartialOrd for CauseOfDelay {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CauseOfDelay {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cause
            .cmp(&other.cause)
            .then_with(|| self.location.cmp(&other.location))
            .then_with(|| self.variable.cmp(&other.variable))
    }
}

impl fmt::Display for CauseOfDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variable {
            Some(v) => write!(f, "{}@{}[{}]", self.cause, self.location, v),
            None => write!(f, "{}@{}", self.cause, self.location),
        }
    }
}

/// An ordered, deduplicated set of causes. Empty means "no delay".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Causes {
    set: BTreeSet<CauseOfDelay>,
}

impl Causes {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_cause(cause: CauseOfDelay) -> Self {
        let mut set = BTreeSet::new();
        set.insert(cause);
        Self { set }
    }

    /// Cause "awaiting initial value of `variable` at `location`".
    pub fn initial_value(variable: Variable, location: Location) -> Self {
        Self::from_cause(CauseOfDelay::variable(Cause::InitialValue, location, variable))
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn is_delayed(&self) -> bool {
        !self.set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CauseOfDelay> {
        self.set.iter()
    }

    pub fn contains_cause(&self, cause: Cause) -> bool {
        self.set.iter().any(|c| c.cause == cause)
    }

    pub fn contains_variable_cause(&self, cause: Cause, variable: &Variable) -> bool {
        self.set.iter().any(|c| c.cause == cause && c.variable.as_ref() == Some(variable))
    }

    /// Set union, deduplicated, truncated past `MAX_CAUSES` keeping the
    /// lowest causes so the result stays deterministic.
    pub fn merge(&self, other: &Causes) -> Causes {
        if other.set.is_empty() {
            return self.clone();
        }
        if self.set.is_empty() {
            return other.clone();
        }
        let set: BTreeSet<CauseOfDelay> = self.set.union(&other.set).take(MAX_CAUSES).cloned().collect();
        Causes { set }
    }

    pub fn merge_into(&mut self, other: &Causes) {
        if !other.set.is_empty() {
            *self = self.merge(other);
        }
    }

    /// Stable fingerprint of the cause set, used by break-delay detection to
    /// decide whether the same delay keeps recurring across iterations.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for c in &self.set {
            c.cause.hash(&mut hasher);
            c.location.hash(&mut hasher);
            if let Some(v) = &c.variable {
                v.fully_qualified_name().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

impl fmt::Display for Causes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.set {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{c}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<CauseOfDelay> for Causes {
    fn from_iter<I: IntoIterator<Item = CauseOfDelay>>(iter: I) -> Self {
        let set: BTreeSet<CauseOfDelay> = iter.into_iter().collect();
        let set = set.into_iter().take(MAX_CAUSES).collect();
        Causes { set }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cause(tag: Cause, stmt: &str) -> CauseOfDelay {
        CauseOfDelay::new(tag, Location::new("unit", stmt))
    }

    #[test]
    fn test_union_never_drops_a_cause() {
        let c1 = Causes::from_cause(cause(Cause::Condition, "0"));
        let c2 = Causes::from_cause(cause(Cause::InitialValue, "1"));
        let merged = c1.merge(&c2);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains_cause(Cause::Condition));
        assert!(merged.contains_cause(Cause::InitialValue));
    }

    #[test]
    fn test_union_deduplicates() {
        let c1 = Causes::from_cause(cause(Cause::Condition, "0"));
        let merged = c1.merge(&c1.clone());
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_empty_merge_is_identity() {
        let c1 = Causes::from_cause(cause(Cause::Execution, "2"));
        assert_eq!(c1.merge(&Causes::none()), c1);
        assert_eq!(Causes::none().merge(&c1), c1);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let c1 = Causes::from_cause(cause(Cause::Condition, "0"));
        let c2 = Causes::from_cause(cause(Cause::Condition, "0"));
        assert_eq!(c1.fingerprint(), c2.fingerprint());
        let c3 = c1.merge(&Causes::from_cause(cause(Cause::Linking, "3")));
        assert_ne!(c1.fingerprint(), c3.fingerprint());
    }

    #[test]
    fn test_union_is_bounded() {
        let mut all = Causes::none();
        for i in 0..100 {
            all.merge_into(&Causes::from_cause(cause(Cause::Condition, &i.to_string())));
        }
        assert!(all.len() <= 40);
    }

    #[test]
    fn test_initial_value_cause_names_the_variable() {
        let v = Variable::local("x");
        let c = Causes::initial_value(v.clone(), Location::new("m", "0"));
        assert!(c.contains_variable_cause(Cause::InitialValue, &v));
    }
}
