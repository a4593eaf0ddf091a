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

//! Reconciliation of a variable's branch-local states at a join point.
//!
//! The value merge is a decision procedure, first match wins: keep the
//! previous value when nothing changed, collapse special-equal outcomes,
//! build conditionals for one or two complementary branches, take an
//! always-running last branch, propagate delays, and finally retreat to an
//! opaque instance when no symbolic conclusion exists. Non-value properties
//! merge independently via per-property monoid operators.

use crate::assignment_ids::{AssignmentIds, Stage, stage_id};
use crate::container::{ContainerId, VariableData};
use crate::delay::Causes;
use crate::dv::{Dv, LatticeOp};
use crate::error::{CoreError, CoreResult};
use crate::expr::{Evaluator, Expr, TranslationMap, delayed_conclusion};
use crate::linked::LinkedVariables;
use crate::location::Location;
use crate::properties::{Properties, Property, PropertyCatalogue, PropertyKind};
use crate::snapshot::VariableSnapshot;
use crate::variable::Variable;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// One taken sub-block feeding a merge, in source order.
#[derive(Debug, Clone)]
pub struct MergeSource {
    pub condition: Expr,
    /// Return/throw/break at the end of the branch: a dead end for value
    /// merging, still relevant for property aggregation.
    pub always_escapes: bool,
    pub snapshot: VariableSnapshot,
}

impl MergeSource {
    pub fn new(condition: Expr, snapshot: VariableSnapshot) -> Self {
        Self {
            condition,
            always_escapes: false,
            snapshot,
        }
    }

    pub fn escaping(condition: Expr, snapshot: VariableSnapshot) -> Self {
        Self {
            condition,
            always_escapes: true,
            snapshot,
        }
    }
}

/// The joined post-statement state of one variable.
#[derive(Debug, Clone)]
pub struct MergedState {
    pub value: Expr,
    pub properties: Properties,
    pub linked: LinkedVariables,
    pub assignment_ids: AssignmentIds,
    pub read_id: String,
}

/// Grouped property values collected across individual merges, keyed per
/// variable, handed to the cross-variable clustering pass in one go rather
/// than entering each variable's merged snapshot.
#[derive(Debug, Default)]
pub struct GroupPropertyValues {
    values: BTreeMap<Property, BTreeMap<Variable, Dv>>,
}

impl GroupPropertyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, property: Property, variable: Variable, value: Dv) {
        self.values.entry(property).or_default().insert(variable, value);
    }

    pub fn get(&self, property: Property, variable: &Variable) -> Option<&Dv> {
        self.values.get(&property).and_then(|m| m.get(variable))
    }

    pub fn variables(&self, property: Property) -> impl Iterator<Item = (&Variable, &Dv)> {
        self.values.get(&property).into_iter().flat_map(|m| m.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|m| m.is_empty())
    }
}

enum ValueConclusion {
    Symbolic(Expr),
    /// No symbolic conclusion; retreat to an opaque instance.
    NoConclusion,
}

/// Merge engine for one join point.
///
/// `state` is the enclosing absolute state at the join; `execution_delay`
/// carries an unresolved flow-reachability question, which keeps context
/// properties delayed until it settles.
pub struct MergeEngine<'a> {
    catalogue: &'a PropertyCatalogue,
    evaluator: &'a dyn Evaluator,
    location: Location,
    state: Expr,
    execution_delay: Causes,
    loop_variables: BTreeSet<Variable>,
    formal_types: BTreeMap<Variable, String>,
}

impl<'a> MergeEngine<'a> {
    pub fn new(catalogue: &'a PropertyCatalogue, evaluator: &'a dyn Evaluator, location: Location) -> Self {
        Self {
            catalogue,
            evaluator,
            location,
            state: Expr::TRUE,
            execution_delay: Causes::none(),
            loop_variables: BTreeSet::new(),
            formal_types: BTreeMap::new(),
        }
    }

    pub fn with_state(mut self, state: Expr) -> Self {
        self.state = state;
        self
    }

    pub fn with_execution_delay(mut self, causes: Causes) -> Self {
        self.execution_delay = causes;
        self
    }

    pub fn with_loop_variable(mut self, variable: Variable) -> Self {
        self.loop_variables.insert(variable);
        self
    }

    pub fn with_formal_type(mut self, variable: Variable, type_name: impl Into<String>) -> Self {
        self.formal_types.insert(variable, type_name.into());
        self
    }

    /// Merge `previous` with the branch outcomes. `guaranteed` asserts that
    /// at least one branch executes (if/else with both arms, as opposed to a
    /// bare if).
    pub fn merge(&self, previous: &VariableSnapshot, guaranteed: bool, sources: &[MergeSource]) -> CoreResult<MergedState> {
        let variable = previous.variable().clone();
        if guaranteed && sources.is_empty() {
            return Err(CoreError::EmptyMergeSources {
                variable: variable.fully_qualified_name(),
            });
        }
        let reduced: Vec<&MergeSource> = sources.iter().filter(|s| !s.always_escapes).collect();

        let conclusion = self.merge_value(&variable, previous, guaranteed, &reduced)?;
        let value = match conclusion {
            ValueConclusion::Symbolic(v) => v,
            ValueConclusion::NoConclusion => self.no_conclusion_instance(&variable, previous, guaranteed, &reduced),
        };
        trace!(variable = %variable, %value, "merged value");

        let properties = self.merge_properties(&value, previous, guaranteed, sources, &reduced);
        let linked = self.merge_linked(previous, guaranteed, &reduced);
        let (assignment_ids, read_id) = self.merge_timestamps(previous, guaranteed, sources);

        Ok(MergedState {
            value,
            properties,
            linked,
            assignment_ids,
            read_id,
        })
    }

    /// Convenience for the driver: merge the container's pre-branch state
    /// and write the result into its Merge stage. Returns progress.
    pub fn merge_container(&self, data: &mut VariableData, id: ContainerId, guaranteed: bool, sources: &[MergeSource]) -> CoreResult<bool> {
        let previous = data.best(id, Stage::Evaluation).clone();
        let merged = self.merge(&previous, guaranteed, sources)?;
        data.ensure_merge(id, merged.assignment_ids.clone(), merged.read_id.clone())?;
        data.set_value(id, Stage::Merge, merged.value, merged.linked, &merged.properties, self.catalogue)
    }

    // --- value -----------------------------------------------------------

    fn merge_value(&self, variable: &Variable, previous: &VariableSnapshot, guaranteed: bool, reduced: &[&MergeSource]) -> CoreResult<ValueConclusion> {
        let previous_value = previous.value();

        // nothing to merge yet
        if !guaranteed && previous_value.is_empty() {
            return Ok(ValueConclusion::Symbolic(previous_value.clone()));
        }
        if reduced.is_empty() {
            if guaranteed {
                // every branch escapes, yet one is guaranteed to execute:
                // the value after the join is unreachable code's value
                return Err(CoreError::EmptyMergeSources {
                    variable: variable.fully_qualified_name(),
                });
            }
            return Ok(ValueConclusion::Symbolic(previous_value.clone()));
        }

        // no-op merge: every outcome equals the previous value
        if reduced.iter().all(|s| s.snapshot.value() == previous_value) {
            return Ok(ValueConclusion::Symbolic(previous_value.clone()));
        }

        // all outcomes special-equal to the first: collapse
        let first = reduced[0].snapshot.value();
        if guaranteed && reduced[1..].iter().all(|s| special_equals(s.snapshot.value(), first)) {
            return Ok(ValueConclusion::Symbolic(first.clone()));
        }

        if reduced.len() == 1 {
            return self.one_branch(variable, previous, guaranteed, reduced[0]);
        }

        if reduced.len() == 2 && guaranteed {
            let second_condition = &reduced[1].condition;
            if *second_condition == reduced[0].condition.negate() || second_condition.is_bool_true() {
                return self.two_complementary(variable, previous, reduced[0], reduced[1]);
            }
        }

        // switch/try with several arms: a default/finally that always runs
        // decides the value
        if let Some(last) = reduced.last() {
            if last.condition.is_bool_true() {
                return Ok(ValueConclusion::Symbolic(last.snapshot.value().clone()));
            }
        }

        let delays = self.branch_delays(reduced);
        if delays.is_delayed() {
            return Ok(ValueConclusion::Symbolic(delayed_conclusion(variable, delays)));
        }
        Ok(ValueConclusion::NoConclusion)
    }

    fn one_branch(&self, variable: &Variable, previous: &VariableSnapshot, guaranteed: bool, branch: &MergeSource) -> CoreResult<ValueConclusion> {
        let branch_value = branch.snapshot.value();
        if guaranteed {
            return Ok(ValueConclusion::Symbolic(branch_value.clone()));
        }
        if variable.is_return_variable() {
            if self.state.is_bool_true() {
                return Ok(ValueConclusion::Symbolic(branch_value.clone()));
            }
            if variable.is_boolean_return() {
                let anded = self.evaluator.and(&[self.state.clone(), branch_value.clone()]);
                if anded.inconsistent {
                    return Ok(ValueConclusion::NoConclusion);
                }
                return Ok(ValueConclusion::Symbolic(anded.value));
            }
        }
        let condition = self.rewrite_condition_from_loop_variable_to_parameter(&branch.condition, &self.state);
        let simplified = self.evaluator.conditional(&condition, branch_value, previous.value());
        if simplified.inconsistent {
            debug!(variable = %variable, "evaluator inconsistency, retreating");
            return Ok(ValueConclusion::NoConclusion);
        }
        Ok(ValueConclusion::Symbolic(simplified.value))
    }

    fn two_complementary(&self, variable: &Variable, previous: &VariableSnapshot, first: &MergeSource, second: &MergeSource) -> CoreResult<ValueConclusion> {
        let condition = self.rewrite_condition_from_loop_variable_to_parameter(&first.condition, &self.state);
        let two_way = self.evaluator.conditional(&condition, first.snapshot.value(), second.snapshot.value());
        if two_way.inconsistent {
            return Ok(ValueConclusion::NoConclusion);
        }
        if variable.is_return_variable() && !self.state.is_bool_true() {
            if self.state.is_bool_false() {
                // an unreachable statement must never reach the merge step
                return Err(CoreError::UnreachableMerge {
                    variable: variable.fully_qualified_name(),
                });
            }
            let gated = self.evaluator.conditional(&self.state, &two_way.value, previous.value());
            if gated.inconsistent {
                return Ok(ValueConclusion::NoConclusion);
            }
            return Ok(ValueConclusion::Symbolic(gated.value));
        }
        Ok(ValueConclusion::Symbolic(two_way.value))
    }

    fn branch_delays(&self, reduced: &[&MergeSource]) -> Causes {
        let mut causes = self.execution_delay.clone();
        for s in reduced {
            causes.merge_into(&s.snapshot.value().causes_of_delay());
            causes.merge_into(&s.condition.causes_of_delay());
        }
        causes
    }

    /// No symbolic conclusion: an opaque instance carrying the worst
    /// not-null across the branches, plus the formal-type defaults for the
    /// remaining value properties.
    fn no_conclusion_instance(&self, variable: &Variable, previous: &VariableSnapshot, guaranteed: bool, reduced: &[&MergeSource]) -> Expr {
        let branch_not_null: Vec<Dv> = reduced.iter().map(|s| s.snapshot.get_property(PropertyCatalogue::NOT_NULL, self.catalogue)).collect();
        let mut not_null = Dv::fold(LatticeOp::Min, branch_not_null.iter());
        if !guaranteed {
            not_null = not_null.min(&previous.get_property(PropertyCatalogue::NOT_NULL, self.catalogue));
        }
        if not_null.is_delayed() {
            return delayed_conclusion(variable, not_null.causes());
        }
        let mut properties = vec![(PropertyCatalogue::NOT_NULL, not_null)];
        for p in self.catalogue.value_properties() {
            if p != PropertyCatalogue::NOT_NULL {
                properties.push((p, self.catalogue.default_dv(p)));
            }
        }
        let type_name = self.formal_types.get(variable).cloned().unwrap_or_else(|| "?".to_string());
        Expr::Instance {
            index: stage_id(&self.location.statement, Stage::Merge),
            type_name,
            properties: Properties::of(properties),
        }
    }

    // --- properties, aliasing, timestamps --------------------------------

    /// Per-property monoid fold over all branches (escaping ones included)
    /// plus, unless exhaustive, the previous snapshot. Grouped properties are
    /// deferred to the cross-variable clustering pass; value properties are
    /// only concluded when the merged value itself is concrete.
    fn merge_properties(&self, value: &Expr, previous: &VariableSnapshot, guaranteed: bool, sources: &[MergeSource], reduced: &[&MergeSource]) -> Properties {
        let mut merged = Properties::writable();
        for p in self.catalogue.all() {
            if self.catalogue.is_group_property(p) {
                continue;
            }
            let def = self.catalogue.def(p);
            if def.kind == PropertyKind::Value {
                if value.is_delayed() || value.is_empty() {
                    continue;
                }
                if let Expr::Instance { properties, .. } = value {
                    if let Some(dv) = properties.get_or_none(p) {
                        let _ = merged.put(p, dv.clone(), self.catalogue);
                    }
                    continue;
                }
                let mut values: Vec<Dv> = reduced.iter().map(|s| s.snapshot.get_property(p, self.catalogue)).collect();
                if !guaranteed {
                    values.push(previous.get_property(p, self.catalogue));
                }
                let _ = merged.put(p, Dv::fold(def.merge_op, values.iter()), self.catalogue);
            } else {
                let mut values: Vec<Dv> = sources.iter().map(|s| s.snapshot.get_property(p, self.catalogue)).collect();
                if !guaranteed {
                    values.push(previous.get_property(p, self.catalogue));
                }
                let mut dv = Dv::fold(def.merge_op, values.iter());
                if def.kind == PropertyKind::Context && self.execution_delay.is_delayed() {
                    dv = Dv::delayed(dv.causes().merge(&self.execution_delay));
                }
                let _ = merged.put(p, dv, self.catalogue);
            }
        }
        merged
    }

    /// Fold the grouped properties across the branches into `out`, keyed by
    /// this variable, with the same monoid and execution-delay rules as the
    /// other context properties. The clustering pass consumes `out` once
    /// every variable at the join has been merged.
    pub fn merge_group_properties(&self, previous: &VariableSnapshot, guaranteed: bool, sources: &[MergeSource], out: &mut GroupPropertyValues) {
        let variable = previous.variable().clone();
        for p in self.catalogue.all().filter(|p| self.catalogue.is_group_property(*p)) {
            let mut values: Vec<Dv> = sources.iter().map(|s| s.snapshot.get_property(p, self.catalogue)).collect();
            if !guaranteed {
                values.push(previous.get_property(p, self.catalogue));
            }
            let mut dv = Dv::fold(self.catalogue.def(p).merge_op, values.iter());
            if self.execution_delay.is_delayed() {
                dv = Dv::delayed(dv.causes().merge(&self.execution_delay));
            }
            out.set(p, variable.clone(), dv);
        }
    }

    fn merge_linked(&self, previous: &VariableSnapshot, guaranteed: bool, reduced: &[&MergeSource]) -> LinkedVariables {
        let mut linked = if guaranteed {
            LinkedVariables::empty()
        } else {
            previous.linked_variables().clone()
        };
        for s in reduced {
            linked = linked.merge(s.snapshot.linked_variables());
        }
        linked
    }

    /// The merged assignment-id set is the union of the branch sets, plus
    /// the previous set if not exhaustive, whenever any branch assigned
    /// after this point's evaluation timestamp; otherwise the previous ids
    /// stand. The read id follows the same rule.
    fn merge_timestamps(&self, previous: &VariableSnapshot, guaranteed: bool, sources: &[MergeSource]) -> (AssignmentIds, String) {
        let evaluation_ts = stage_id(&self.location.statement, Stage::Evaluation);
        let merge_ts = stage_id(&self.location.statement, Stage::Merge);

        let any_assigned_in_block = sources.iter().any(|s| s.snapshot.assignment_ids().latest_is_after(&evaluation_ts));
        let assignment_ids = if any_assigned_in_block {
            let branch_sets: Vec<&AssignmentIds> = sources.iter().map(|s| s.snapshot.assignment_ids()).collect();
            let all = branch_sets.into_iter().chain((!guaranteed).then(|| previous.assignment_ids()));
            AssignmentIds::merged(merge_ts.clone(), all)
        } else {
            previous.assignment_ids().clone()
        };

        let any_read_in_block = sources.iter().any(|s| s.snapshot.read_id() > evaluation_ts.as_str());
        let read_id = if any_read_in_block { merge_ts } else { previous.read_id().to_string() };

        (assignment_ids, read_id)
    }

    // --- loop-variable condition rewrite ---------------------------------

    /// Recover a caller's invariant about its argument from a callee's
    /// invariant about a structurally-linked loop counter: given a condition
    /// `i == p` for loop variable `i` and parameter `p`, drop state
    /// components not mentioning `i`, turn the equality itself into `true`,
    /// substitute `i` by `p` in what remains, and re-conjoin with the
    /// original equality.
    pub fn rewrite_condition_from_loop_variable_to_parameter(&self, condition: &Expr, state: &Expr) -> Expr {
        let Expr::Equals(lhs, rhs) = condition else {
            return condition.clone();
        };
        let (loop_var, param) = match (&**lhs, &**rhs) {
            (Expr::VariableRef(a), Expr::VariableRef(b)) if self.loop_variables.contains(a) && matches!(b, Variable::Parameter { .. }) => (a, b),
            (Expr::VariableRef(a), Expr::VariableRef(b)) if self.loop_variables.contains(b) && matches!(a, Variable::Parameter { .. }) => (b, a),
            _ => return condition.clone(),
        };
        let map = TranslationMap::new().put(loop_var.clone(), Expr::variable(param.clone()));
        let rewritten = state
            .conjuncts()
            .into_iter()
            .filter(|c| c.mentions(loop_var))
            .map(|c| if c == *condition { Expr::TRUE } else { c.translate(&map) });
        Expr::and(std::iter::once(condition.clone()).chain(rewritten))
    }
}

/// Value equality that treats two delays on the same variable as equal,
/// regardless of their exact causes.
fn special_equals(a: &Expr, b: &Expr) -> bool {
    if let (Expr::Delayed { variable: Some(va), .. }, Expr::Delayed { variable: Some(vb), .. }) = (a, b) {
        return va == vb;
    }
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment_ids::NOT_YET;
    use crate::expr::{BasicEvaluator, CmpOp};

    fn catalogue() -> PropertyCatalogue {
        PropertyCatalogue::standard()
    }

    /// A branch outcome whose value is concrete, with the value properties
    /// decided alongside it.
    fn done_snapshot(cat: &PropertyCatalogue, statement: &str, value: Expr) -> VariableSnapshot {
        let mut props = vec![(PropertyCatalogue::NOT_NULL, Dv::decided(1))];
        for p in cat.value_properties() {
            if p != PropertyCatalogue::NOT_NULL {
                props.push((p, cat.default_dv(p)));
            }
        }
        VariableSnapshot::with_value(Location::new("m", statement), Variable::local("x"), value, Properties::of(props))
    }

    fn previous_with(cat: &PropertyCatalogue, value: Expr) -> VariableSnapshot {
        done_snapshot(cat, "0", value)
    }

    fn b() -> Expr {
        Expr::variable(Variable::local("b"))
    }

    #[test]
    fn test_merge_identity_keeps_previous_value() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let sources = [
            MergeSource::new(b(), done_snapshot(&cat, "1.0.0", Expr::IntConst(1))),
            MergeSource::new(b().negate(), done_snapshot(&cat, "1.1.0", Expr::IntConst(1))),
        ];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.value, Expr::IntConst(1));
    }

    #[test]
    fn test_two_way_complementary_merge() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let sources = [
            MergeSource::new(b(), done_snapshot(&cat, "1.0.0", Expr::IntConst(3))),
            MergeSource::new(b().negate(), done_snapshot(&cat, "1.1.0", Expr::IntConst(5))),
        ];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.value, Expr::Conditional {
            condition: Box::new(b()),
            if_true: Box::new(Expr::IntConst(3)),
            if_false: Box::new(Expr::IntConst(5)),
        });
    }

    #[test]
    fn test_single_branch_non_exhaustive_merge() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let c = Expr::variable(Variable::local("c"));
        let sources = [MergeSource::new(c.clone(), done_snapshot(&cat, "1.0.0", Expr::IntConst(3)))];
        let merged = engine.merge(&previous, false, &sources).unwrap();
        assert_eq!(merged.value, Expr::Conditional {
            condition: Box::new(c),
            if_true: Box::new(Expr::IntConst(3)),
            if_false: Box::new(Expr::IntConst(1)),
        });
    }

    #[test]
    fn test_single_branch_guaranteed_takes_branch_value() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let sources = [MergeSource::new(Expr::TRUE, done_snapshot(&cat, "1.0.0", Expr::IntConst(3)))];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.value, Expr::IntConst(3));
    }

    #[test]
    fn test_escaping_branch_excluded_from_value_merge() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        // if (b) return; else x = 5;
        let sources = [
            MergeSource::escaping(b(), done_snapshot(&cat, "1.0.0", Expr::IntConst(1))),
            MergeSource::new(b().negate(), done_snapshot(&cat, "1.1.0", Expr::IntConst(5))),
        ];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.value, Expr::IntConst(5));
    }

    #[test]
    fn test_special_equals_collapses_same_variable_delays() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let f = Variable::local("f");
        let d1 = Expr::initial_delay(f.clone(), Location::new("m", "1.0.0"));
        let d2 = Expr::initial_delay(f, Location::new("m", "1.1.0"));
        let s1 = VariableSnapshot::with_value(Location::new("m", "1.0.0"), Variable::local("x"), d1.clone(), Properties::writable());
        let s2 = VariableSnapshot::with_value(Location::new("m", "1.1.0"), Variable::local("x"), d2, Properties::writable());
        let sources = [MergeSource::new(b(), s1), MergeSource::new(b().negate(), s2)];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.value, d1);
    }

    #[test]
    fn test_delay_propagates_with_united_causes() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let d = Expr::initial_delay(Variable::local("f"), Location::new("m", "1.0.0"));
        let s1 = VariableSnapshot::with_value(Location::new("m", "1.0.0"), Variable::local("x"), d.clone(), Properties::writable());
        // three branches, none complementary, one delayed
        let sources = [
            MergeSource::new(b(), s1),
            MergeSource::new(Expr::variable(Variable::local("c")), done_snapshot(&cat, "1.1.0", Expr::IntConst(5))),
            MergeSource::new(Expr::variable(Variable::local("e")), done_snapshot(&cat, "1.2.0", Expr::IntConst(7))),
        ];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert!(merged.value.is_delayed());
        assert!(merged.value.causes_of_delay().contains_cause(crate::delay::Cause::InitialValue));
    }

    #[test]
    fn test_no_symbolic_conclusion_builds_instance_with_worst_not_null() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        // three non-complementary decided branches: no symbolic merge
        let mut props = vec![(PropertyCatalogue::NOT_NULL, Dv::decided(0))];
        for p in cat.value_properties() {
            if p != PropertyCatalogue::NOT_NULL {
                props.push((p, cat.default_dv(p)));
            }
        }
        let nullable = VariableSnapshot::with_value(Location::new("m", "1.1.0"), Variable::local("x"), Expr::IntConst(5), Properties::of(props));
        let sources = [
            MergeSource::new(b(), done_snapshot(&cat, "1.0.0", Expr::IntConst(3))),
            MergeSource::new(Expr::variable(Variable::local("c")), nullable),
            MergeSource::new(Expr::variable(Variable::local("e")), done_snapshot(&cat, "1.2.0", Expr::IntConst(7))),
        ];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        let Expr::Instance { properties, .. } = &merged.value else {
            panic!("expected an opaque instance, got {}", merged.value);
        };
        assert_eq!(properties.get_or_none(PropertyCatalogue::NOT_NULL), Some(&Dv::decided(0)));
        assert_eq!(merged.properties.get_or_none(PropertyCatalogue::NOT_NULL), Some(&Dv::decided(0)));
    }

    #[test]
    fn test_finally_branch_with_true_condition_wins() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let sources = [
            MergeSource::new(b(), done_snapshot(&cat, "1.0.0", Expr::IntConst(3))),
            MergeSource::new(Expr::variable(Variable::local("c")), done_snapshot(&cat, "1.1.0", Expr::IntConst(5))),
            MergeSource::new(Expr::TRUE, done_snapshot(&cat, "1.2.0", Expr::IntConst(9))),
        ];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.value, Expr::IntConst(9));
    }

    #[test]
    fn test_empty_sources_guaranteed_is_a_contract_violation() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let err = engine.merge(&previous, true, &[]);
        assert!(matches!(err, Err(CoreError::EmptyMergeSources { .. })));
    }

    #[test]
    fn test_unreachable_state_on_return_variable_merge() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1")).with_state(Expr::FALSE);
        let rv = Variable::return_variable("m", false);
        let previous = VariableSnapshot::with_value(Location::new("m", "0"), rv.clone(), Expr::IntConst(1), Properties::writable());
        let sources = [
            MergeSource::new(b(), VariableSnapshot::with_value(Location::new("m", "1.0.0"), rv.clone(), Expr::IntConst(3), Properties::writable())),
            MergeSource::new(b().negate(), VariableSnapshot::with_value(Location::new("m", "1.1.0"), rv, Expr::IntConst(5), Properties::writable())),
        ];
        let err = engine.merge(&previous, true, &sources);
        assert!(matches!(err, Err(CoreError::UnreachableMerge { .. })));
    }

    #[test]
    fn test_boolean_return_variable_gated_by_state() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let state = Expr::variable(Variable::local("s"));
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1")).with_state(state.clone());
        let rv = Variable::return_variable("m", true);
        let previous = VariableSnapshot::with_value(Location::new("m", "0"), rv.clone(), Expr::FALSE, Properties::writable());
        let sources = [MergeSource::new(b(), VariableSnapshot::with_value(Location::new("m", "1.0.0"), rv, Expr::TRUE, Properties::writable()))];
        let merged = engine.merge(&previous, false, &sources).unwrap();
        assert_eq!(merged.value, state);
    }

    #[test]
    fn test_loop_variable_condition_rewrite() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let i = Variable::local("i");
        let p = Variable::parameter("m", "p", 0);
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "2")).with_loop_variable(i.clone());
        let condition = Expr::equals(Expr::variable(i.clone()), Expr::variable(p.clone()));
        let state = Expr::and([
            condition.clone(),
            Expr::cmp(CmpOp::Ge, Expr::variable(i.clone()), Expr::IntConst(0)),
            Expr::cmp(CmpOp::Le, Expr::variable(i), Expr::IntConst(10)),
        ]);
        let rewritten = engine.rewrite_condition_from_loop_variable_to_parameter(&condition, &state);
        assert_eq!(
            rewritten,
            Expr::and([
                condition,
                Expr::cmp(CmpOp::Ge, Expr::variable(p.clone()), Expr::IntConst(0)),
                Expr::cmp(CmpOp::Le, Expr::variable(p), Expr::IntConst(10)),
            ])
        );
    }

    #[test]
    fn test_context_properties_fold_with_max() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let mut raised = done_snapshot(&cat, "1.0.0", Expr::IntConst(1));
        raised.set_property(PropertyCatalogue::CONTEXT_IMMUTABLE, Dv::decided(2), &cat).unwrap();
        let mut untouched = done_snapshot(&cat, "1.1.0", Expr::IntConst(1));
        untouched.set_property(PropertyCatalogue::CONTEXT_IMMUTABLE, Dv::decided(0), &cat).unwrap();
        let sources = [MergeSource::new(b(), raised), MergeSource::new(b().negate(), untouched)];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.properties.get_or_none(PropertyCatalogue::CONTEXT_IMMUTABLE), Some(&Dv::decided(2)));
    }

    #[test]
    fn test_execution_delay_keeps_context_properties_open() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let causes = Causes::from_cause(crate::delay::CauseOfDelay::new(crate::delay::Cause::Execution, Location::new("m", "1")));
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1")).with_execution_delay(causes);
        let previous = previous_with(&cat, Expr::IntConst(1));
        let mut s = done_snapshot(&cat, "1.0.0", Expr::IntConst(1));
        s.set_property(PropertyCatalogue::CONTEXT_IMMUTABLE, Dv::decided(0), &cat).unwrap();
        let sources = [MergeSource::new(Expr::TRUE, s)];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        let ci = merged.properties.get_or_none(PropertyCatalogue::CONTEXT_IMMUTABLE).unwrap();
        assert!(ci.is_delayed());
    }

    #[test]
    fn test_grouped_properties_deferred_to_clustering() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let mut s = done_snapshot(&cat, "1.0.0", Expr::IntConst(1));
        s.set_property(PropertyCatalogue::CONTEXT_MODIFIED, Dv::TRUE, &cat).unwrap();
        let sources = [MergeSource::new(Expr::TRUE, s)];
        let merged = engine.merge(&previous, true, &sources).unwrap();
        assert_eq!(merged.properties.get_or_none(PropertyCatalogue::CONTEXT_MODIFIED), None);
    }

    #[test]
    fn test_group_property_values_collected_for_clustering() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "1"));
        let previous = previous_with(&cat, Expr::IntConst(1));
        let mut modified = done_snapshot(&cat, "1.0.0", Expr::IntConst(3));
        modified.set_property(PropertyCatalogue::CONTEXT_MODIFIED, Dv::TRUE, &cat).unwrap();
        let mut untouched = done_snapshot(&cat, "1.1.0", Expr::IntConst(5));
        untouched.set_property(PropertyCatalogue::CONTEXT_MODIFIED, Dv::FALSE, &cat).unwrap();
        let sources = [MergeSource::new(b(), modified), MergeSource::new(b().negate(), untouched)];

        let mut out = GroupPropertyValues::new();
        engine.merge_group_properties(&previous, true, &sources, &mut out);
        // one branch modifying suffices, Max fold
        assert_eq!(out.get(PropertyCatalogue::CONTEXT_MODIFIED, &Variable::local("x")), Some(&Dv::TRUE));
        assert_eq!(out.variables(PropertyCatalogue::CONTEXT_MODIFIED).count(), 1);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_assignment_ids_union_only_when_branch_assigns_later() {
        let cat = catalogue();
        let ev = BasicEvaluator::default();
        let engine = MergeEngine::new(&cat, &ev, Location::new("m", "3"));
        let previous = VariableSnapshot::new(
            Location::new("m", "0"),
            Variable::local("x"),
            AssignmentIds::new(stage_id("0", Stage::Evaluation)),
            NOT_YET,
            BTreeSet::new(),
        );

        // branch assigned inside the sub-block at 3.0.1
        let assigned = VariableSnapshot::new(
            Location::new("m", "3.0.1"),
            Variable::local("x"),
            AssignmentIds::new(stage_id("3.0.1", Stage::Evaluation)),
            NOT_YET,
            BTreeSet::new(),
        );
        let sources = [MergeSource::new(b(), assigned)];
        let (ids, _) = engine.merge_timestamps(&previous, false, &sources);
        assert!(ids.iter().any(|id| id == stage_id("3.0.1", Stage::Evaluation)));
        assert!(ids.iter().any(|id| id == stage_id("3", Stage::Merge)));
        assert!(ids.iter().any(|id| id == stage_id("0", Stage::Evaluation)));

        // branch did not assign: previous ids stand
        let untouched = VariableSnapshot::new(
            Location::new("m", "3.0.1"),
            Variable::local("x"),
            AssignmentIds::new(stage_id("0", Stage::Evaluation)),
            NOT_YET,
            BTreeSet::new(),
        );
        let sources = [MergeSource::new(b(), untouched)];
        let (ids, _) = engine.merge_timestamps(&previous, false, &sources);
        assert_eq!(ids, *previous.assignment_ids());
    }
}
