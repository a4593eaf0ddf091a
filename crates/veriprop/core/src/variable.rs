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

//! Variable identities and their nature metadata.
//!
//! A variable is identified by its fully-qualified name: two identities with
//! the same name are the same variable, regardless of how they were built.
//! The closed set of variants replaces the class hierarchy of a dispatch-based
//! design; scope and static/instance classification live on the field variant
//! because ownership decisions need them.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a variable tracked by the analyser.
#[derive(Debug, Clone)]
pub enum Variable {
    /// A plain local variable.
    Local { name: String },
    /// A method parameter.
    Parameter { method: String, name: String, index: usize },
    /// A field dereferenced through a scope variable (`scope.name`).
    Field {
        owner: String,
        name: String,
        scope: Box<Variable>,
        is_static: bool,
    },
    /// The synthetic slot holding a method's return value.
    Return { method: String, is_boolean: bool },
    /// The synthetic `this` of an instance context.
    This { type_name: String },
    /// An array element, parameterized by array and index variables.
    DependentArray { array: Box<Variable>, index: Box<Variable> },
}

impl Variable {
    pub fn local(name: impl Into<String>) -> Self {
        Variable::Local { name: name.into() }
    }

    pub fn parameter(method: impl Into<String>, name: impl Into<String>, index: usize) -> Self {
        Variable::Parameter {
            method: method.into(),
            name: name.into(),
            index,
        }
    }

    pub fn return_variable(method: impl Into<String>, is_boolean: bool) -> Self {
        Variable::Return {
            method: method.into(),
            is_boolean,
        }
    }

    /// The stable, fully-qualified name that defines identity.
    pub fn fully_qualified_name(&self) -> String {
        match self {
            Variable::Local { name } => name.clone(),
            Variable::Parameter { method, name, .. } => format!("{method}:{name}"),
            Variable::Field { owner, name, scope, .. } => {
                format!("{}.{name}#{owner}", scope.fully_qualified_name())
            }
            Variable::Return { method, .. } => format!("{method}:<return>"),
            Variable::This { type_name } => format!("{type_name}.this"),
            Variable::DependentArray { array, index } => {
                format!("{}[{}]", array.fully_qualified_name(), index.fully_qualified_name())
            }
        }
    }

    /// A short name for rendering inside expressions.
    pub fn simple_name(&self) -> String {
        match self {
            Variable::Local { name } | Variable::Parameter { name, .. } => name.clone(),
            Variable::Field { name, .. } => name.clone(),
            Variable::Return { .. } => "<return>".to_string(),
            Variable::This { .. } => "this".to_string(),
            Variable::DependentArray { array, index } => {
                format!("{}[{}]", array.simple_name(), index.simple_name())
            }
        }
    }

    pub fn is_return_variable(&self) -> bool {
        matches!(self, Variable::Return { .. })
    }

    pub fn is_boolean_return(&self) -> bool {
        matches!(self, Variable::Return { is_boolean: true, .. })
    }

    pub fn is_field(&self) -> bool {
        matches!(self, Variable::Field { .. })
    }

    /// Static fields are owned by the type, instance fields by the scope
    /// variable; ownership decisions key on this.
    pub fn is_static_field(&self) -> bool {
        matches!(self, Variable::Field { is_static: true, .. })
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.fully_qualified_name() == other.fully_qualified_name()
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fully_qualified_name().hash(state);
    }
}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variable {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fully_qualified_name().cmp(&other.fully_qualified_name())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fully_qualified_name())
    }
}

/// Immutable metadata attached to a variable at creation and inherited along
/// the backward chain of containers.
///
/// The one exception to immutability is the revert rule: `DefinedOutsideLoop`
/// unwraps back to its previous nature once the current statement index is no
/// longer inside the loop's textual scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableNature {
    /// Plain local variable.
    Normal,
    /// Loop counter or for-each variable, scoped to the loop statement.
    LoopVariable { statement_index: String },
    /// Variable introduced by a pattern match, scoped to a statement.
    Pattern { scope_index: String },
    /// A variable defined outside an enclosing loop but assigned inside it.
    DefinedOutsideLoop {
        previous: Box<VariableNature>,
        loop_index: String,
    },
    /// Copied from an enclosing scope (lambda, inner unit); implicitly final.
    CopiedFromEnclosing,
}

impl VariableNature {
    /// Unwrap `DefinedOutsideLoop` layers whose loop no longer encloses
    /// `statement_index`. Decided purely on the statement-path prefix.
    pub fn revert_outside_loop(&self, statement_index: &str) -> VariableNature {
        let mut nature = self;
        while let VariableNature::DefinedOutsideLoop { previous, loop_index } = nature {
            if statement_index.starts_with(loop_index.as_str()) {
                break;
            }
            nature = previous;
        }
        nature.clone()
    }

    pub fn is_loop_variable(&self) -> bool {
        matches!(self, VariableNature::LoopVariable { .. })
    }
}
