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

//! The state of one variable at one evaluation stage of one program point.
//!
//! A snapshot's value follows the eventually-final discipline: it may be
//! rewritten while delayed, and is fixed for the rest of all iterations once
//! it becomes concrete. Properties follow the write-once map rules; the
//! aliasing set becomes final once it is no longer delayed.

use crate::assignment_ids::{AssignmentIds, NOT_YET, statement_path};
use crate::delay::{Cause, CauseOfDelay, Causes};
use crate::dv::Dv;
use crate::error::{CoreError, CoreResult};
use crate::expr::Expr;
use crate::linked::LinkedVariables;
use crate::location::Location;
use crate::properties::{Properties, Property, PropertyCatalogue, PropertyKind};
use crate::support::{EventuallyFinal, SetOnce};
use crate::variable::Variable;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSnapshot {
    location: Location,
    variable: Variable,
    assignment_ids: AssignmentIds,
    read_id: String,
    /// Logical times at which the variable was read; filled in iteration 0
    /// so later iterations know where local copies of fields are needed.
    read_at_times: BTreeSet<u32>,
    value: EventuallyFinal<Expr>,
    properties: Properties,
    linked: EventuallyFinal<LinkedVariables>,
    modification_time: SetOnce<u32>,
}

impl VariableSnapshot {
    /// A snapshot whose value awaits its first assignment.
    pub fn new(location: Location, variable: Variable, assignment_ids: AssignmentIds, read_id: impl Into<String>, read_at_times: BTreeSet<u32>) -> Self {
        let initial = Expr::initial_delay(variable.clone(), location.clone());
        let linked_delay = Causes::from_cause(CauseOfDelay::variable(Cause::Linking, location.clone(), variable.clone()));
        Self {
            location,
            variable,
            assignment_ids,
            read_id: read_id.into(),
            read_at_times,
            value: EventuallyFinal::variable(initial),
            properties: Properties::writable(),
            linked: EventuallyFinal::variable(LinkedVariables::delayed(linked_delay)),
            modification_time: SetOnce::new(),
        }
    }

    /// A snapshot that starts from a known value; used by the merge engine
    /// for intermediate results.
    pub fn with_value(location: Location, variable: Variable, value: Expr, properties: Properties) -> Self {
        let mut snapshot = Self::new(location, variable, AssignmentIds::not_yet_assigned(), NOT_YET, BTreeSet::new());
        // infallible: the fresh snapshot's value is still provisional
        let _ = snapshot.value.set_variable(value.clone());
        if value.is_done() {
            let _ = snapshot.value.set_final(value);
        }
        snapshot.properties = properties;
        snapshot
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn assignment_ids(&self) -> &AssignmentIds {
        &self.assignment_ids
    }

    pub fn read_id(&self) -> &str {
        &self.read_id
    }

    pub fn read_at_times(&self) -> &BTreeSet<u32> {
        &self.read_at_times
    }

    pub fn value(&self) -> &Expr {
        self.value.get()
    }

    /// Is the value concrete and fixed?
    pub fn value_is_set(&self) -> bool {
        self.value.is_final()
    }

    pub fn is_delayed(&self) -> bool {
        self.value.get().is_delayed()
    }

    /// Write the value. Delayed values may be rewritten freely; the first
    /// concrete value finalizes the slot, and any different concrete value
    /// afterwards is a contract violation. Returns progress.
    pub fn set_value(&mut self, value: Expr) -> CoreResult<bool> {
        let result = if value.is_delayed() || value.is_empty() {
            self.value.set_variable(value.clone())
        } else {
            self.value.set_final(value.clone())
        };
        result.map_err(|_| CoreError::ValueOverwrite {
            variable: self.variable.fully_qualified_name(),
            location: self.location.to_string(),
            existing: self.value.get().to_string(),
            attempted: value.to_string(),
        })
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn set_property(&mut self, property: Property, value: Dv, catalogue: &PropertyCatalogue) -> CoreResult<bool> {
        self.properties.put(property, value, catalogue).map_err(|e| match e {
            CoreError::PropertyOverwrite {
                property, existing, attempted, ..
            } => CoreError::PropertyOverwrite {
                variable: self.variable.fully_qualified_name(),
                property,
                existing,
                attempted,
            },
            other => other,
        })
    }

    /// Property lookup with the default policy of §4.1: a missing value
    /// property synthesizes a traceable delay; any other missing property
    /// falls back to the catalogue default.
    pub fn get_property(&self, property: Property, catalogue: &PropertyCatalogue) -> Dv {
        if catalogue.is_value_property(property) {
            self.properties.get_value_property(property, &self.variable, &self.location)
        } else {
            self.properties.get_or_default(property, catalogue)
        }
    }

    /// The value properties only, each under the value-property policy.
    pub fn value_properties(&self, catalogue: &PropertyCatalogue) -> Properties {
        Properties::of(catalogue.value_properties().map(|p| (p, self.get_property(p, catalogue))))
    }

    pub fn linked_variables(&self) -> &LinkedVariables {
        self.linked.get()
    }

    pub fn linked_variables_is_set(&self) -> bool {
        self.linked.is_final()
    }

    /// Aliasing follows the same discipline as the value: rewritable while
    /// delayed, final once concrete.
    pub fn set_linked_variables(&mut self, linked: LinkedVariables) -> CoreResult<bool> {
        let result = if linked.is_delayed() {
            self.linked.set_variable(linked)
        } else {
            self.linked.set_final(linked)
        };
        result.map_err(|_| CoreError::LinkedVariablesOverwrite {
            variable: self.variable.fully_qualified_name(),
        })
    }

    pub fn modification_time(&self) -> Option<u32> {
        self.modification_time.get().copied()
    }

    pub fn set_modification_time_if_not_yet_set(&mut self, time: u32) -> bool {
        self.modification_time.set_if_absent(time)
    }

    pub fn is_assigned(&self) -> bool {
        !self.assignment_ids.is_not_yet_assigned()
    }

    pub fn is_read(&self) -> bool {
        self.read_id != NOT_YET
    }

    pub fn is_assigned_in(&self, statement_index: &str) -> bool {
        statement_path(self.assignment_ids.latest()) == statement_index
    }

    pub fn is_read_in(&self, statement_index: &str) -> bool {
        self.is_read() && statement_path(&self.read_id) == statement_index
    }

    /// Seed a brand-new variable's context properties at their defaults.
    pub fn new_variable(&mut self, catalogue: &PropertyCatalogue) -> CoreResult<()> {
        for p in catalogue.all() {
            if catalogue.def(p).kind == PropertyKind::Context {
                self.properties.put(p, catalogue.default_dv(p), catalogue)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for VariableSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} {}", self.variable.fully_qualified_name(), self.value.get(), self.properties)
    }
}
