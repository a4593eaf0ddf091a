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

//! Aliasing sets: which other variables may a variable's value overlap with.

use crate::delay::Causes;
use crate::variable::Variable;
use std::collections::BTreeMap;
use std::fmt;

/// Strength of one aliasing link, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkStrength {
    /// Direct assignment `a = b`: the values are the same object.
    StaticallyAssigned,
    /// Assigned through an expression that preserves the object.
    Assigned,
    /// The values share mutable content.
    Dependent,
    /// Proven disjoint; kept to record the conclusion.
    Independent,
}

/// The aliasing set of one variable, possibly still delayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedVariables {
    links: BTreeMap<Variable, LinkStrength>,
    causes: Causes,
}

impl LinkedVariables {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn delayed(causes: Causes) -> Self {
        Self {
            links: BTreeMap::new(),
            causes,
        }
    }

    pub fn of(links: impl IntoIterator<Item = (Variable, LinkStrength)>) -> Self {
        Self {
            links: links.into_iter().collect(),
            causes: Causes::none(),
        }
    }

    pub fn is_delayed(&self) -> bool {
        self.causes.is_delayed()
    }

    pub fn causes_of_delay(&self) -> &Causes {
        &self.causes
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn strength_of(&self, variable: &Variable) -> Option<LinkStrength> {
        self.links.get(variable).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, LinkStrength)> {
        self.links.iter().map(|(v, s)| (v, *s))
    }

    /// Union keeping the strongest link per variable; delays union as well.
    pub fn merge(&self, other: &LinkedVariables) -> LinkedVariables {
        let mut links = self.links.clone();
        for (v, s) in &other.links {
            links
                .entry(v.clone())
                .and_modify(|existing| {
                    if *s < *existing {
                        *existing = *s;
                    }
                })
                .or_insert(*s);
        }
        LinkedVariables {
            links,
            causes: self.causes.merge(&other.causes),
        }
    }
}

impl fmt::Display for LinkedVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_delayed() {
            return write!(f, "<delayed links>");
        }
        let mut first = true;
        for (v, s) in &self.links {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}:{:?}", v.simple_name(), s)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::{Cause, CauseOfDelay};
    use crate::location::Location;

    #[test]
    fn test_merge_keeps_strongest_link() {
        let v = Variable::local("y");
        let a = LinkedVariables::of([(v.clone(), LinkStrength::Dependent)]);
        let b = LinkedVariables::of([(v.clone(), LinkStrength::StaticallyAssigned)]);
        let merged = a.merge(&b);
        assert_eq!(merged.strength_of(&v), Some(LinkStrength::StaticallyAssigned));
    }

    #[test]
    fn test_merge_unions_delays() {
        let d = LinkedVariables::delayed(Causes::from_cause(CauseOfDelay::new(Cause::Linking, Location::new("u", "1"))));
        let merged = LinkedVariables::empty().merge(&d);
        assert!(merged.is_delayed());
    }
}
