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

//! The value-expression model consumed by snapshots and the merge engine.
//!
//! The full expression evaluator is an external collaborator; the merge
//! engine only needs to build conditionals, negate and conjoin conditions,
//! substitute variables, and detect delays. `BasicEvaluator` provides the
//! structural simplifications those operations need, behind the `Evaluator`
//! trait so a richer evaluator can be plugged in. An evaluator may report an
//! internal inconsistency; the merge engine then retreats to its
//! no-symbolic-conclusion fallback.

use crate::delay::{Cause, CauseOfDelay, Causes};
use crate::location::Location;
use crate::properties::Properties;
use crate::variable::Variable;
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operators appearing in conditions and invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Ge,
    Gt,
    Le,
    Lt,
}

impl CmpOp {
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Lt => CmpOp::Ge,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Lt => "<",
        };
        write!(f, "{s}")
    }
}

/// A value expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// The unresolved "not yet assigned" marker.
    Empty,
    BoolConst(bool),
    IntConst(i64),
    VariableRef(Variable),
    Negation(Box<Expr>),
    And(Vec<Expr>),
    Equals(Box<Expr>, Box<Expr>),
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// An opaque instance with known properties but no symbolic value;
    /// produced when a merge reaches no symbolic conclusion.
    Instance {
        index: String,
        type_name: String,
        properties: Properties,
    },
    /// Placeholder for the return value of a method not yet assigned.
    UnknownReturn { method: String },
    /// A value that is not yet known, with the causes of the delay.
    Delayed {
        variable: Option<Variable>,
        causes: Causes,
    },
}

impl Expr {
    pub const TRUE: Expr = Expr::BoolConst(true);
    pub const FALSE: Expr = Expr::BoolConst(false);

    pub fn variable(v: Variable) -> Expr {
        Expr::VariableRef(v)
    }

    pub fn delayed_variable(variable: Variable, causes: Causes) -> Expr {
        Expr::Delayed {
            variable: Some(variable),
            causes,
        }
    }

    /// Initial value of a variable awaiting its first assignment.
    pub fn initial_delay(variable: Variable, location: Location) -> Expr {
        let causes = Causes::initial_value(variable.clone(), location);
        Expr::delayed_variable(variable, causes)
    }

    pub fn equals(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Equals(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmp(op: CmpOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Cmp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn is_bool_true(&self) -> bool {
        matches!(self, Expr::BoolConst(true))
    }

    pub fn is_bool_false(&self) -> bool {
        matches!(self, Expr::BoolConst(false))
    }

    pub fn is_bool_constant(&self) -> bool {
        matches!(self, Expr::BoolConst(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Expr::Empty)
    }

    pub fn is_instance(&self) -> bool {
        matches!(self, Expr::Instance { .. })
    }

    pub fn is_delayed(&self) -> bool {
        self.causes_of_delay().is_delayed()
    }

    pub fn is_done(&self) -> bool {
        !self.is_delayed()
    }

    /// Union of delay causes over the whole tree.
    pub fn causes_of_delay(&self) -> Causes {
        match self {
            Expr::Delayed { causes, .. } => causes.clone(),
            Expr::Empty | Expr::BoolConst(_) | Expr::IntConst(_) | Expr::VariableRef(_) | Expr::Instance { .. } | Expr::UnknownReturn { .. } => Causes::none(),
            Expr::Negation(e) => e.causes_of_delay(),
            Expr::And(parts) => {
                let mut causes = Causes::none();
                for p in parts {
                    causes.merge_into(&p.causes_of_delay());
                }
                causes
            }
            Expr::Equals(l, r) | Expr::Cmp { lhs: l, rhs: r, .. } => l.causes_of_delay().merge(&r.causes_of_delay()),
            Expr::Conditional {
                condition,
                if_true,
                if_false,
            } => condition
                .causes_of_delay()
                .merge(&if_true.causes_of_delay())
                .merge(&if_false.causes_of_delay()),
        }
    }

    /// Extend a delayed expression's cause set; other expressions are
    /// returned unchanged.
    pub fn merge_delays(&self, extra: &Causes) -> Expr {
        match self {
            Expr::Delayed { variable, causes } => Expr::Delayed {
                variable: variable.clone(),
                causes: causes.merge(extra),
            },
            other => other.clone(),
        }
    }

    /// Does this expression mention `variable` anywhere?
    pub fn mentions(&self, variable: &Variable) -> bool {
        match self {
            Expr::VariableRef(v) => v == variable,
            Expr::Delayed { variable: Some(v), .. } => v == variable,
            Expr::Delayed { variable: None, .. } | Expr::Empty | Expr::BoolConst(_) | Expr::IntConst(_) | Expr::Instance { .. } | Expr::UnknownReturn { .. } => false,
            Expr::Negation(e) => e.mentions(variable),
            Expr::And(parts) => parts.iter().any(|p| p.mentions(variable)),
            Expr::Equals(l, r) | Expr::Cmp { lhs: l, rhs: r, .. } => l.mentions(variable) || r.mentions(variable),
            Expr::Conditional {
                condition,
                if_true,
                if_false,
            } => condition.mentions(variable) || if_true.mentions(variable) || if_false.mentions(variable),
        }
    }

    /// Structural negation with double-negation elimination.
    pub fn negate(&self) -> Expr {
        match self {
            Expr::BoolConst(b) => Expr::BoolConst(!b),
            Expr::Negation(inner) => (**inner).clone(),
            Expr::Cmp { op, lhs, rhs } => Expr::Cmp {
                op: op.negate(),
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
            other => Expr::Negation(Box::new(other.clone())),
        }
    }

    /// Flattening conjunction: drops `true`, collapses on `false`,
    /// deduplicates, detects direct contradictions.
    pub fn and(parts: impl IntoIterator<Item = Expr>) -> Expr {
        let mut flat: Vec<Expr> = Vec::new();
        for p in parts {
            match p {
                Expr::BoolConst(true) => {}
                Expr::BoolConst(false) => return Expr::FALSE,
                Expr::And(inner) => {
                    for q in inner {
                        if !flat.contains(&q) {
                            flat.push(q);
                        }
                    }
                }
                other => {
                    if !flat.contains(&other) {
                        flat.push(other);
                    }
                }
            }
        }
        for p in &flat {
            if flat.contains(&p.negate()) {
                return Expr::FALSE;
            }
        }
        match flat.pop() {
            None => Expr::TRUE,
            Some(only) if flat.is_empty() => only,
            Some(last) => {
                flat.push(last);
                Expr::And(flat)
            }
        }
    }

    /// Conjunction components: the parts of an `And`, or the expression
    /// itself.
    pub fn conjuncts(&self) -> Vec<Expr> {
        match self {
            Expr::And(parts) => parts.clone(),
            other => vec![other.clone()],
        }
    }

    /// Substitute variables according to `map`, recursively.
    pub fn translate(&self, map: &TranslationMap) -> Expr {
        match self {
            Expr::VariableRef(v) => map.get(v).cloned().unwrap_or_else(|| self.clone()),
            Expr::Delayed { variable: Some(v), .. } => map.get(v).cloned().unwrap_or_else(|| self.clone()),
            Expr::Empty | Expr::BoolConst(_) | Expr::IntConst(_) | Expr::Instance { .. } | Expr::UnknownReturn { .. } | Expr::Delayed { variable: None, .. } => self.clone(),
            Expr::Negation(e) => e.translate(map).negate(),
            Expr::And(parts) => Expr::and(parts.iter().map(|p| p.translate(map))),
            Expr::Equals(l, r) => Expr::equals(l.translate(map), r.translate(map)),
            Expr::Cmp { op, lhs, rhs } => Expr::cmp(*op, lhs.translate(map), rhs.translate(map)),
            Expr::Conditional {
                condition,
                if_true,
                if_false,
            } => Expr::Conditional {
                condition: Box::new(condition.translate(map)),
                if_true: Box::new(if_true.translate(map)),
                if_false: Box::new(if_false.translate(map)),
            },
        }
    }

    /// Node count, used for the complexity soft limit.
    pub fn complexity(&self) -> usize {
        match self {
            Expr::Empty | Expr::BoolConst(_) | Expr::IntConst(_) | Expr::VariableRef(_) | Expr::Instance { .. } | Expr::UnknownReturn { .. } | Expr::Delayed { .. } => 1,
            Expr::Negation(e) => 1 + e.complexity(),
            Expr::And(parts) => 1 + parts.iter().map(Expr::complexity).sum::<usize>(),
            Expr::Equals(l, r) | Expr::Cmp { lhs: l, rhs: r, .. } => 1 + l.complexity() + r.complexity(),
            Expr::Conditional {
                condition,
                if_true,
                if_false,
            } => 1 + condition.complexity() + if_true.complexity() + if_false.complexity(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Empty => write!(f, "<empty>"),
            Expr::BoolConst(b) => write!(f, "{b}"),
            Expr::IntConst(i) => write!(f, "{i}"),
            Expr::VariableRef(v) => write!(f, "{}", v.simple_name()),
            Expr::Negation(e) => write!(f, "!({e})"),
            Expr::And(parts) => {
                let joined: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", joined.join(" && "))
            }
            Expr::Equals(l, r) => write!(f, "{l}=={r}"),
            Expr::Cmp { op, lhs, rhs } => write!(f, "{lhs}{op}{rhs}"),
            Expr::Conditional {
                condition,
                if_true,
                if_false,
            } => write!(f, "{condition}?{if_true}:{if_false}"),
            Expr::Instance { type_name, index, .. } => write!(f, "instance({type_name}@{index})"),
            Expr::UnknownReturn { method } => write!(f, "<return:{method}>"),
            Expr::Delayed { variable, .. } => match variable {
                Some(v) => write!(f, "<delayed:{}>", v.simple_name()),
                None => write!(f, "<delayed>"),
            },
        }
    }
}

/// Variable-to-expression substitution map.
#[derive(Debug, Clone, Default)]
pub struct TranslationMap {
    map: BTreeMap<Variable, Expr>,
}

impl TranslationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, from: Variable, to: Expr) -> Self {
        self.map.insert(from, to);
        self
    }

    pub fn get(&self, v: &Variable) -> Option<&Expr> {
        self.map.get(v)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Result of a simplification request.
#[derive(Debug, Clone)]
pub struct Simplified {
    pub value: Expr,
    /// The evaluator hit an internal inconsistency; callers retreat to a
    /// no-symbolic-conclusion result.
    pub inconsistent: bool,
}

impl Simplified {
    pub fn ok(value: Expr) -> Self {
        Self {
            value,
            inconsistent: false,
        }
    }

    pub fn inconsistent(value: Expr) -> Self {
        Self {
            value,
            inconsistent: true,
        }
    }
}

/// The seam to the external expression evaluator.
pub trait Evaluator {
    /// Build and simplify `condition ? if_true : if_false`.
    fn conditional(&self, condition: &Expr, if_true: &Expr, if_false: &Expr) -> Simplified;

    /// Build and simplify a conjunction.
    fn and(&self, parts: &[Expr]) -> Simplified {
        Simplified::ok(Expr::and(parts.iter().cloned()))
    }
}

/// Structural evaluator: enough simplification for the merge engine and its
/// tests, bounded by the complexity soft limit.
#[derive(Debug, Clone)]
pub struct BasicEvaluator {
    complexity_limit: usize,
}

impl Default for BasicEvaluator {
    fn default() -> Self {
        Self { complexity_limit: 200 }
    }
}

impl BasicEvaluator {
    pub fn new(complexity_limit: usize) -> Self {
        Self { complexity_limit }
    }
}

impl Evaluator for BasicEvaluator {
    fn conditional(&self, condition: &Expr, if_true: &Expr, if_false: &Expr) -> Simplified {
        if condition.is_bool_true() {
            return Simplified::ok(if_true.clone());
        }
        if condition.is_bool_false() {
            return Simplified::ok(if_false.clone());
        }
        if if_true == if_false {
            return Simplified::ok(if_true.clone());
        }
        // c ? true : false -> c
        if if_true.is_bool_true() && if_false.is_bool_false() {
            return Simplified::ok(condition.clone());
        }
        // c ? false : true -> !c
        if if_true.is_bool_false() && if_false.is_bool_true() {
            return Simplified::ok(condition.negate());
        }
        // !c ? a : b -> c ? b : a
        if let Expr::Negation(inner) = condition {
            return self.conditional(inner, if_false, if_true);
        }
        let result = Expr::Conditional {
            condition: Box::new(condition.clone()),
            if_true: Box::new(if_true.clone()),
            if_false: Box::new(if_false.clone()),
        };
        if result.complexity() > self.complexity_limit {
            return Simplified::inconsistent(result);
        }
        Simplified::ok(result)
    }
}

/// A delayed conclusion for a merge whose branch values are still open.
pub fn delayed_conclusion(variable: &Variable, causes: Causes) -> Expr {
    Expr::delayed_variable(variable.clone(), causes)
}

/// A delay cause recorded when a condition itself could not be evaluated.
pub fn condition_delay(variable: &Variable, location: &Location) -> Causes {
    Causes::from_cause(CauseOfDelay::variable(Cause::Condition, location.clone(), variable.clone()))
}
