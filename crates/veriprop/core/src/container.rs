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

//! Per-program-point variable state containers and their backward chain.
//!
//! A container owns the three-stage progression Initial -> Evaluation -> Merge
//! of one variable at one statement, and points backward to the container for
//! the same variable at the nearest preceding statement. The chain lives in a
//! flat append-only arena per analysed unit: a container references its
//! predecessor by index, and a predecessor's index is always smaller than its
//! successor's, so the chain is acyclic by construction.

use crate::assignment_ids::{AssignmentIds, NOT_YET, Stage};
use crate::delay::Causes;
use crate::dv::Dv;
use crate::error::{CoreError, CoreResult};
use crate::expr::Expr;
use crate::linked::LinkedVariables;
use crate::location::Location;
use crate::properties::{Properties, Property, PropertyCatalogue};
use crate::snapshot::VariableSnapshot;
use crate::support::{FlipSwitch, SetOnce};
use crate::variable::{Variable, VariableNature};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Index of a container in a unit's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub usize);

/// Where a container's Initial stage comes from: an owned snapshot for a new
/// variable, or a backward link into the arena for an existing one. The level
/// selects how deep into the predecessor's stages the link reads (Evaluation
/// when the predecessor is the enclosing parent statement, Merge when it is
/// the preceding sibling).
#[derive(Debug, Clone)]
pub enum PreviousOrInitial {
    Previous { id: ContainerId, level_for_previous: Stage },
    Initial(VariableSnapshot),
}

#[derive(Debug, Clone)]
pub struct VariableContainer {
    location: Location,
    nature: VariableNature,
    previous_or_initial: PreviousOrInitial,
    evaluation: SetOnce<VariableSnapshot>,
    /// `None` for statements without sub-blocks; requesting the merge stage
    /// on such a container is a contract violation.
    merge: Option<SetOnce<VariableSnapshot>>,
    removed: FlipSwitch,
    /// Context-property decisions imposed from outside the local computation,
    /// each set at most once.
    overrides: BTreeMap<Property, Dv>,
}

impl VariableContainer {
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn nature(&self) -> &VariableNature {
        &self.nature
    }

    pub fn has_evaluation(&self) -> bool {
        self.evaluation.is_set()
    }

    pub fn has_merge(&self) -> bool {
        self.merge.as_ref().is_some_and(SetOnce::is_set)
    }

    pub fn supports_merge(&self) -> bool {
        self.merge.is_some()
    }

    pub fn override_of(&self, property: Property) -> Option<&Dv> {
        self.overrides.get(&property)
    }
}

/// Append-only arena of containers for one analysed unit.
#[derive(Debug, Default)]
pub struct VariableData {
    containers: Vec<VariableContainer>,
    latest_by_name: BTreeMap<String, ContainerId>,
}

impl VariableData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ContainerId> {
        (0..self.containers.len()).map(ContainerId)
    }

    pub fn container(&self, id: ContainerId) -> &VariableContainer {
        &self.containers[id.0]
    }

    /// The most recently created container of the variable with this
    /// fully-qualified name, if any.
    pub fn latest(&self, fqn: &str) -> Option<ContainerId> {
        self.latest_by_name.get(fqn).copied()
    }

    fn push(&mut self, container: VariableContainer) -> ContainerId {
        let id = ContainerId(self.containers.len());
        let fqn = self.variable_of(&container).fully_qualified_name();
        self.containers.push(container);
        self.latest_by_name.insert(fqn, id);
        id
    }

    fn variable_of(&self, container: &VariableContainer) -> Variable {
        match &container.previous_or_initial {
            PreviousOrInitial::Initial(snapshot) => snapshot.variable().clone(),
            PreviousOrInitial::Previous { id, level_for_previous } => self.best(*id, *level_for_previous).variable().clone(),
        }
    }

    // --- factories -------------------------------------------------------

    /// First appearance of a variable: an owned Initial snapshot with its
    /// context properties seeded at their defaults.
    pub fn new_variable(
        &mut self,
        variable: Variable,
        location: Location,
        nature: VariableNature,
        has_sub_blocks: bool,
        catalogue: &PropertyCatalogue,
    ) -> CoreResult<ContainerId> {
        let mut initial = VariableSnapshot::new(location.clone(), variable, AssignmentIds::not_yet_assigned(), NOT_YET, BTreeSet::new());
        initial.new_variable(catalogue)?;
        trace!(variable = %initial.variable(), %location, "new variable");
        Ok(self.push(VariableContainer {
            location,
            nature,
            previous_or_initial: PreviousOrInitial::Initial(initial),
            evaluation: SetOnce::new(),
            merge: has_sub_blocks.then(SetOnce::new),
            removed: FlipSwitch::new(),
            overrides: BTreeMap::new(),
        }))
    }

    /// The same variable at a later statement. The backward link reads the
    /// predecessor at Evaluation level when the predecessor is the enclosing
    /// parent statement, else at Merge level. The nature reverts
    /// `DefinedOutsideLoop` layers whose loop no longer encloses us.
    pub fn existing_variable(&mut self, previous: ContainerId, location: Location, previous_is_parent: bool, has_sub_blocks: bool) -> ContainerId {
        let nature = self.container(previous).nature.revert_outside_loop(&location.statement);
        self.chained(previous, location, nature, previous_is_parent, has_sub_blocks)
    }

    /// The same variable entering a loop body: its nature gains a
    /// `DefinedOutsideLoop` layer remembering the loop statement.
    pub fn existing_variable_into_loop(&mut self, previous: ContainerId, location: Location, previous_is_parent: bool, has_sub_blocks: bool) -> ContainerId {
        let nature = VariableNature::DefinedOutsideLoop {
            previous: Box::new(self.container(previous).nature.clone()),
            loop_index: location.statement.clone(),
        };
        self.chained(previous, location, nature, previous_is_parent, has_sub_blocks)
    }

    fn chained(&mut self, previous: ContainerId, location: Location, nature: VariableNature, previous_is_parent: bool, has_sub_blocks: bool) -> ContainerId {
        debug_assert!(previous.0 < self.containers.len());
        let level_for_previous = if previous_is_parent { Stage::Evaluation } else { Stage::Merge };
        self.push(VariableContainer {
            location,
            nature,
            previous_or_initial: PreviousOrInitial::Previous { id: previous, level_for_previous },
            evaluation: SetOnce::new(),
            merge: has_sub_blocks.then(SetOnce::new),
            removed: FlipSwitch::new(),
            overrides: BTreeMap::new(),
        })
    }

    /// A variable captured from an enclosing unit (lambda, nested type): its
    /// state is copied in as an owned Initial snapshot.
    pub fn copy_from_enclosing(&mut self, enclosing: VariableSnapshot, location: Location, has_sub_blocks: bool) -> ContainerId {
        self.push(VariableContainer {
            location,
            nature: VariableNature::CopiedFromEnclosing,
            previous_or_initial: PreviousOrInitial::Initial(enclosing),
            evaluation: SetOnce::new(),
            merge: has_sub_blocks.then(SetOnce::new),
            removed: FlipSwitch::new(),
            overrides: BTreeMap::new(),
        })
    }

    // --- reads -----------------------------------------------------------

    /// The snapshot this container inherits: its owned Initial, or the
    /// predecessor's best snapshot at the linked level.
    pub fn previous_or_initial(&self, id: ContainerId) -> &VariableSnapshot {
        match &self.containers[id.0].previous_or_initial {
            PreviousOrInitial::Initial(snapshot) => snapshot,
            PreviousOrInitial::Previous { id, level_for_previous } => self.best(*id, *level_for_previous),
        }
    }

    /// The highest materialized snapshot at or below `stage`.
    pub fn best(&self, id: ContainerId, stage: Stage) -> &VariableSnapshot {
        let c = &self.containers[id.0];
        if stage == Stage::Merge {
            if let Some(m) = c.merge.as_ref().and_then(SetOnce::get) {
                return m;
            }
        }
        if stage >= Stage::Evaluation {
            if let Some(e) = c.evaluation.get() {
                return e;
            }
        }
        self.previous_or_initial(id)
    }

    /// The snapshot visible to readers of this program point, by stage
    /// priority Merge > Evaluation > Initial.
    pub fn current(&self, id: ContainerId) -> &VariableSnapshot {
        self.best(id, Stage::Merge)
    }

    pub fn variable(&self, id: ContainerId) -> Variable {
        self.current(id).variable().clone()
    }

    /// Is this container still at its owned Initial, with nothing evaluated
    /// here or anywhere up the chain?
    pub fn is_recursively_initial(&self, id: ContainerId) -> bool {
        let c = &self.containers[id.0];
        if c.evaluation.is_set() || c.has_merge() {
            return false;
        }
        match &c.previous_or_initial {
            PreviousOrInitial::Initial(_) => true,
            PreviousOrInitial::Previous { id, .. } => self.is_recursively_initial(*id),
        }
    }

    // --- stage transitions -----------------------------------------------

    /// Materialize the Evaluation stage. Idempotent: a second request is a
    /// no-op and returns false.
    pub fn ensure_evaluation(&mut self, id: ContainerId, assignment_ids: AssignmentIds, read_id: impl Into<String>, read_at_times: BTreeSet<u32>) -> bool {
        if self.containers[id.0].evaluation.is_set() {
            return false;
        }
        let variable = self.previous_or_initial(id).variable().clone();
        let location = self.containers[id.0].location.clone();
        let snapshot = VariableSnapshot::new(location, variable, assignment_ids, read_id, read_at_times);
        // just checked the slot is empty
        let _ = self.containers[id.0].evaluation.set(snapshot);
        true
    }

    /// Materialize the Merge stage. Fails on containers created without
    /// sub-block support; idempotent otherwise.
    pub fn ensure_merge(&mut self, id: ContainerId, assignment_ids: AssignmentIds, read_id: impl Into<String>) -> CoreResult<bool> {
        let variable = self.best(id, Stage::Evaluation).variable().clone();
        let location = self.containers[id.0].location.clone();
        let Some(slot) = self.containers[id.0].merge.as_mut() else {
            return Err(CoreError::MergeWithoutSubBlocks {
                variable: variable.fully_qualified_name(),
                location: location.to_string(),
            });
        };
        if slot.is_set() {
            return Ok(false);
        }
        let snapshot = VariableSnapshot::new(location, variable, assignment_ids, read_id, BTreeSet::new());
        let _ = slot.set(snapshot);
        Ok(true)
    }

    fn snapshot_mut(&mut self, id: ContainerId, stage: Stage) -> CoreResult<&mut VariableSnapshot> {
        let variable = self.current(id).variable().fully_qualified_name();
        let c = &mut self.containers[id.0];
        match stage {
            Stage::Initial => match &mut c.previous_or_initial {
                PreviousOrInitial::Initial(snapshot) => Ok(snapshot),
                PreviousOrInitial::Previous { .. } => Err(CoreError::NotAnInitialWrite { variable }),
            },
            Stage::Evaluation => c.evaluation.get_mut().ok_or(CoreError::StageNotPresent {
                variable,
                stage: "Evaluation".to_string(),
            }),
            Stage::Merge => c.merge.as_mut().and_then(SetOnce::get_mut).ok_or(CoreError::StageNotPresent {
                variable,
                stage: "Merge".to_string(),
            }),
        }
    }

    // --- writes ----------------------------------------------------------

    /// Write value, aliasing and properties into the snapshot at `stage`.
    ///
    /// When the value is concrete, every value property must be decided along
    /// with it; a delayed value property at that point is a contract
    /// violation, since value properties resolve exactly when the value does.
    /// Returns whether anything progressed from delayed toward decided.
    pub fn set_value(
        &mut self,
        id: ContainerId,
        stage: Stage,
        value: Expr,
        linked: LinkedVariables,
        properties: &Properties,
        catalogue: &PropertyCatalogue,
    ) -> CoreResult<bool> {
        if value.is_done() {
            for (p, dv) in properties.iter() {
                if catalogue.is_value_property(*p) && dv.is_delayed() {
                    return Err(CoreError::DelayOnValueProperty {
                        variable: self.current(id).variable().fully_qualified_name(),
                        property: catalogue.name(*p).to_string(),
                    });
                }
            }
        }
        let snapshot = self.snapshot_mut(id, stage)?;
        let mut progress = snapshot.set_value(value)?;
        progress |= snapshot.set_linked_variables(linked)?;
        for (p, dv) in properties.iter() {
            progress |= snapshot.set_property(*p, dv.clone(), catalogue)?;
        }
        Ok(progress)
    }

    /// Variant of [`Self::set_value`] that stands down when the slot already
    /// holds a concrete value, instead of raising an overwrite violation.
    pub fn safe_set_value(
        &mut self,
        id: ContainerId,
        stage: Stage,
        value: Expr,
        linked: LinkedVariables,
        properties: &Properties,
        catalogue: &PropertyCatalogue,
    ) -> CoreResult<bool> {
        if self.snapshot_mut(id, stage)?.value_is_set() {
            return Ok(false);
        }
        self.set_value(id, stage, value, linked, properties, catalogue)
    }

    /// Write one property at `stage`. Initial-stage writes are only legal
    /// while the chain is still recursively initial.
    pub fn set_property(&mut self, id: ContainerId, stage: Stage, property: Property, value: Dv, catalogue: &PropertyCatalogue) -> CoreResult<bool> {
        if stage == Stage::Initial && !self.is_recursively_initial(id) {
            return Err(CoreError::NotAnInitialWrite {
                variable: self.current(id).variable().fully_qualified_name(),
            });
        }
        self.snapshot_mut(id, stage)?.set_property(property, value, catalogue)
    }

    pub fn set_linked_variables(&mut self, id: ContainerId, stage: Stage, linked: LinkedVariables) -> CoreResult<bool> {
        self.snapshot_mut(id, stage)?.set_linked_variables(linked)
    }

    /// Iteration >= 1, variable neither read nor assigned at this point:
    /// propagate the previous point's snapshot unchanged into Evaluation.
    /// Grouped properties are left for the cross-variable clustering pass.
    pub fn copy(&mut self, id: ContainerId, catalogue: &PropertyCatalogue) -> CoreResult<bool> {
        let previous = self.previous_or_initial(id).clone();
        self.ensure_evaluation(id, previous.assignment_ids().clone(), previous.read_id().to_string(), previous.read_at_times().clone());
        let snapshot = self.snapshot_mut(id, Stage::Evaluation)?;
        let mut progress = false;
        if previous.value_is_set() || snapshot.value().is_delayed() {
            progress |= snapshot.set_value(previous.value().clone())?;
        }
        if previous.linked_variables_is_set() || snapshot.linked_variables().is_delayed() {
            progress |= snapshot.set_linked_variables(previous.linked_variables().clone())?;
        }
        for (p, dv) in previous.properties().iter() {
            if catalogue.is_group_property(*p) {
                continue;
            }
            progress |= snapshot.set_property(*p, dv.clone(), catalogue)?;
        }
        Ok(progress)
    }

    /// Materialize a writable snapshot at `stage` purely to receive property
    /// and aliasing writes, passing the value through unchanged.
    pub fn ensure_level_for_properties_linked_variables(&mut self, id: ContainerId, stage: Stage) -> CoreResult<()> {
        match stage {
            Stage::Initial => Ok(()),
            Stage::Evaluation => {
                if self.containers[id.0].evaluation.is_set() {
                    return Ok(());
                }
                let previous = self.previous_or_initial(id).clone();
                self.ensure_evaluation(id, previous.assignment_ids().clone(), previous.read_id().to_string(), previous.read_at_times().clone());
                self.pass_value_through(id, Stage::Evaluation, &previous)
            }
            Stage::Merge => {
                if self.containers[id.0].merge.is_none() {
                    return Err(CoreError::MergeWithoutSubBlocks {
                        variable: self.current(id).variable().fully_qualified_name(),
                        location: self.containers[id.0].location.to_string(),
                    });
                }
                if self.container(id).has_merge() {
                    return Ok(());
                }
                let below = self.best(id, Stage::Evaluation).clone();
                self.ensure_merge(id, below.assignment_ids().clone(), below.read_id().to_string())?;
                self.pass_value_through(id, Stage::Merge, &below)
            }
        }
    }

    fn pass_value_through(&mut self, id: ContainerId, stage: Stage, from: &VariableSnapshot) -> CoreResult<()> {
        let snapshot = self.snapshot_mut(id, stage)?;
        if from.value_is_set() {
            snapshot.set_value(from.value().clone())?;
        }
        if from.linked_variables_is_set() {
            snapshot.set_linked_variables(from.linked_variables().clone())?;
        }
        Ok(())
    }

    // --- removal and overrides -------------------------------------------

    /// Mark the container removed, e.g. because its defining block became
    /// unreachable. Monotonic.
    pub fn remove(&mut self, id: ContainerId) {
        self.containers[id.0].removed.set();
    }

    /// Removed here or anywhere up the backward chain.
    pub fn is_removed(&self, id: ContainerId) -> bool {
        let c = &self.containers[id.0];
        if c.removed.is_set() {
            return true;
        }
        match &c.previous_or_initial {
            PreviousOrInitial::Initial(_) => false,
            PreviousOrInitial::Previous { id, .. } => self.is_removed(*id),
        }
    }

    /// Impose a context-property decision from outside the local computation.
    /// Each (container, property) pair accepts one decision.
    pub fn set_override(&mut self, id: ContainerId, property: Property, value: Dv, catalogue: &PropertyCatalogue) -> CoreResult<()> {
        let variable = self.current(id).variable().fully_qualified_name();
        let c = &mut self.containers[id.0];
        if let Some(existing) = c.overrides.get(&property) {
            if existing.same_value(&value) {
                return Ok(());
            }
            return Err(CoreError::OverrideOverwrite {
                variable,
                property: catalogue.name(property).to_string(),
                existing: existing.to_string(),
                attempted: value.to_string(),
            });
        }
        c.overrides.insert(property, value);
        Ok(())
    }

    /// Union of delays over the current snapshots of all live containers.
    pub fn delays(&self) -> Causes {
        let mut causes = Causes::none();
        for id in self.ids() {
            if self.is_removed(id) {
                continue;
            }
            let snapshot = self.current(id);
            causes.merge_into(&snapshot.value().causes_of_delay());
            causes.merge_into(&snapshot.properties().delays());
        }
        causes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment_ids::{Stage, stage_id};
    use crate::dv::Dv;

    fn arena_with_new_variable(has_sub_blocks: bool) -> (VariableData, ContainerId, PropertyCatalogue) {
        let cat = PropertyCatalogue::standard();
        let mut data = VariableData::new();
        let id = data
            .new_variable(Variable::local("x"), Location::new("m", "0"), VariableNature::Normal, has_sub_blocks, &cat)
            .unwrap();
        (data, id, cat)
    }

    #[test]
    fn test_initial_always_available() {
        let (data, id, _) = arena_with_new_variable(false);
        let current = data.current(id);
        assert!(current.is_delayed());
        assert_eq!(current.variable(), &Variable::local("x"));
    }

    #[test]
    fn test_stage_priority_merge_over_evaluation_over_initial() {
        let (mut data, id, cat) = arena_with_new_variable(true);
        data.ensure_evaluation(id, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
        data.set_value(id, Stage::Evaluation, Expr::IntConst(1), LinkedVariables::empty(), &Properties::writable(), &cat)
            .unwrap();
        assert_eq!(data.current(id).value(), &Expr::IntConst(1));

        data.ensure_merge(id, AssignmentIds::new(stage_id("0", Stage::Merge)), NOT_YET).unwrap();
        data.set_value(id, Stage::Merge, Expr::IntConst(2), LinkedVariables::empty(), &Properties::writable(), &cat)
            .unwrap();
        assert_eq!(data.current(id).value(), &Expr::IntConst(2));
        assert_eq!(data.best(id, Stage::Evaluation).value(), &Expr::IntConst(1));
    }

    #[test]
    fn test_safe_set_value_stands_down_on_concrete_value() {
        let (mut data, id, cat) = arena_with_new_variable(false);
        data.ensure_evaluation(id, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
        assert!(
            data.safe_set_value(id, Stage::Evaluation, Expr::IntConst(1), LinkedVariables::empty(), &Properties::writable(), &cat)
                .unwrap()
        );
        // a second, conflicting safe write is a silent no-op
        assert!(
            !data
                .safe_set_value(id, Stage::Evaluation, Expr::IntConst(9), LinkedVariables::empty(), &Properties::writable(), &cat)
                .unwrap()
        );
        assert_eq!(data.current(id).value(), &Expr::IntConst(1));
    }

    #[test]
    fn test_merge_without_sub_blocks_is_a_contract_violation() {
        let (mut data, id, _) = arena_with_new_variable(false);
        let err = data.ensure_merge(id, AssignmentIds::not_yet_assigned(), NOT_YET);
        assert!(matches!(err, Err(CoreError::MergeWithoutSubBlocks { .. })));
    }

    #[test]
    fn test_ensure_evaluation_is_idempotent() {
        let (mut data, id, _) = arena_with_new_variable(false);
        assert!(data.ensure_evaluation(id, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new()));
        assert!(!data.ensure_evaluation(id, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new()));
    }

    #[test]
    fn test_backward_chain_reads_through() {
        let (mut data, first, cat) = arena_with_new_variable(false);
        data.ensure_evaluation(first, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
        data.set_value(first, Stage::Evaluation, Expr::IntConst(7), LinkedVariables::empty(), &Properties::writable(), &cat)
            .unwrap();

        let second = data.existing_variable(first, Location::new("m", "1"), false, false);
        // nothing evaluated at statement 1: readers see statement 0's result
        assert_eq!(data.current(second).value(), &Expr::IntConst(7));
        assert_eq!(data.latest("x"), Some(second));
    }

    #[test]
    fn test_copy_skips_grouped_properties() {
        let (mut data, first, cat) = arena_with_new_variable(false);
        data.ensure_evaluation(first, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
        let props = Properties::of([
            (PropertyCatalogue::NOT_NULL, Dv::decided(1)),
            (PropertyCatalogue::CONTEXT_NOT_NULL, Dv::decided(1)),
        ]);
        data.set_value(first, Stage::Evaluation, Expr::IntConst(7), LinkedVariables::empty(), &props, &cat).unwrap();

        let second = data.existing_variable(first, Location::new("m", "1"), false, false);
        data.copy(second, &cat).unwrap();
        let copied = data.best(second, Stage::Evaluation);
        assert_eq!(copied.value(), &Expr::IntConst(7));
        assert_eq!(copied.properties().get_or_none(PropertyCatalogue::NOT_NULL), Some(&Dv::decided(1)));
        // CONTEXT_NOT_NULL is grouped: deferred to the clustering pass
        assert_eq!(copied.properties().get_or_none(PropertyCatalogue::CONTEXT_NOT_NULL), None);
    }

    #[test]
    fn test_value_property_must_be_decided_with_value() {
        let (mut data, id, cat) = arena_with_new_variable(false);
        data.ensure_evaluation(id, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
        let props = Properties::of([(
            PropertyCatalogue::IMMUTABLE,
            Dv::delayed(Causes::initial_value(Variable::local("x"), Location::new("m", "0"))),
        )]);
        let err = data.set_value(id, Stage::Evaluation, Expr::IntConst(3), LinkedVariables::empty(), &props, &cat);
        assert!(matches!(err, Err(CoreError::DelayOnValueProperty { .. })));
    }

    #[test]
    fn test_initial_write_requires_recursively_initial_chain() {
        let (mut data, id, cat) = arena_with_new_variable(false);
        assert!(data.set_property(id, Stage::Initial, PropertyCatalogue::EXTERNAL_NOT_NULL, Dv::decided(1), &cat).is_ok());

        data.ensure_evaluation(id, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
        let err = data.set_property(id, Stage::Initial, PropertyCatalogue::EXTERNAL_IMMUTABLE, Dv::decided(1), &cat);
        assert!(matches!(err, Err(CoreError::NotAnInitialWrite { .. })));
    }

    #[test]
    fn test_removal_is_monotonic_and_inherited() {
        let (mut data, first, _) = arena_with_new_variable(false);
        let second = data.existing_variable(first, Location::new("m", "1"), false, false);
        assert!(!data.is_removed(second));
        data.remove(first);
        assert!(data.is_removed(first));
        assert!(data.is_removed(second));
    }

    #[test]
    fn test_nature_reverts_when_leaving_loop_scope() {
        let (mut data, first, _) = arena_with_new_variable(false);
        let in_loop = data.existing_variable_into_loop(first, Location::new("m", "1"), false, false);
        assert!(matches!(data.container(in_loop).nature(), VariableNature::DefinedOutsideLoop { .. }));

        let inside = data.existing_variable(in_loop, Location::new("m", "1.0.0"), true, false);
        assert!(matches!(data.container(inside).nature(), VariableNature::DefinedOutsideLoop { .. }));

        let after = data.existing_variable(in_loop, Location::new("m", "2"), false, false);
        assert_eq!(data.container(after).nature(), &VariableNature::Normal);
    }

    #[test]
    fn test_override_is_set_once() {
        let (mut data, id, cat) = arena_with_new_variable(false);
        data.set_override(id, PropertyCatalogue::CONTEXT_MODIFIED, Dv::TRUE, &cat).unwrap();
        assert_eq!(data.container(id).override_of(PropertyCatalogue::CONTEXT_MODIFIED), Some(&Dv::TRUE));
        // idempotent for the same decision
        data.set_override(id, PropertyCatalogue::CONTEXT_MODIFIED, Dv::TRUE, &cat).unwrap();
        let err = data.set_override(id, PropertyCatalogue::CONTEXT_MODIFIED, Dv::FALSE, &cat);
        assert!(matches!(err, Err(CoreError::OverrideOverwrite { .. })));
    }

    #[test]
    fn test_delays_aggregate_over_live_containers() {
        let (mut data, id, cat) = arena_with_new_variable(false);
        assert!(data.delays().is_delayed());
        data.ensure_evaluation(id, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
        data.set_value(id, Stage::Evaluation, Expr::IntConst(3), LinkedVariables::empty(), &Properties::writable(), &cat)
            .unwrap();
        assert!(!data.delays().is_delayed());
    }
}
