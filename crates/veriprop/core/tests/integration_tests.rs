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

//! Integration tests for the analyser core: container chains across
//! statements, branch merges, scope layering and the iterative fixpoint
//! loop working together on small synthetic methods.

use std::collections::BTreeSet;
use std::sync::Arc;
use veriprop_core::{
    AnalyserConfig, AnalysisStatus, AssignmentIds, BasicEvaluator, Cause, CauseOfDelay, Causes, Dv, ElementAnalysis, Expr, FixpointDriver, FixpointOutcome, LinkedVariables,
    Location, MergeEngine, MergeSource, NOT_YET, Properties, PropertyCatalogue, ScopeLayer, Stage, Variable, VariableData, VariableNature, VariableSnapshot, stage_id,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Value properties decided alongside a concrete value.
fn decided_value_properties(cat: &PropertyCatalogue, not_null: i32) -> Properties {
    let mut props = vec![(PropertyCatalogue::NOT_NULL, Dv::decided(not_null))];
    for p in cat.value_properties() {
        if p != PropertyCatalogue::NOT_NULL {
            props.push((p, cat.default_dv(p)));
        }
    }
    Properties::of(props)
}

fn branch_snapshot(cat: &PropertyCatalogue, statement: &str, variable: Variable, value: Expr) -> VariableSnapshot {
    VariableSnapshot::with_value(Location::new("T.m", statement), variable, value, decided_value_properties(cat, 1))
}

/// x = 1; if (b) { x = 3 } else { x = 5 }
/// After the join, readers of x must see b ? 3 : 5.
#[test]
fn test_assignment_branch_and_merge_across_statements() {
    init_tracing();
    let cat = PropertyCatalogue::standard();
    let ev = BasicEvaluator::default();
    let x = Variable::local("x");
    let b = Expr::variable(Variable::local("b"));

    let mut data = VariableData::new();
    let at_0 = data
        .new_variable(x.clone(), Location::new("T.m", "0"), VariableNature::Normal, false, &cat)
        .unwrap();
    data.ensure_evaluation(at_0, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
    data.set_value(at_0, Stage::Evaluation, Expr::IntConst(1), LinkedVariables::empty(), &decided_value_properties(&cat, 1), &cat)
        .unwrap();

    // statement 1 has sub-blocks; x passes into it via the backward chain
    let at_1 = data.existing_variable(at_0, Location::new("T.m", "1"), false, true);
    assert_eq!(data.current(at_1).value(), &Expr::IntConst(1));

    let engine = MergeEngine::new(&cat, &ev, Location::new("T.m", "1"));
    let sources = [
        MergeSource::new(b.clone(), branch_snapshot(&cat, "1.0.0", x.clone(), Expr::IntConst(3))),
        MergeSource::new(b.negate(), branch_snapshot(&cat, "1.1.0", x.clone(), Expr::IntConst(5))),
    ];
    let progress = engine.merge_container(&mut data, at_1, true, &sources).unwrap();
    assert!(progress);

    let merged = data.current(at_1);
    assert_eq!(merged.value(), &Expr::Conditional {
        condition: Box::new(b),
        if_true: Box::new(Expr::IntConst(3)),
        if_false: Box::new(Expr::IntConst(5)),
    });

    // statement 2 reads the merged result through the chain
    let at_2 = data.existing_variable(at_1, Location::new("T.m", "2"), false, false);
    assert_eq!(data.current(at_2).value(), data.best(at_1, Stage::Merge).value());
}

/// Timestamps order Initial before Evaluation before the sub-blocks before
/// Merge, purely lexicographically.
#[test]
fn test_timestamp_ordering_through_sub_blocks() {
    let initial = stage_id("1", Stage::Initial);
    let evaluation = stage_id("1", Stage::Evaluation);
    let in_block = stage_id("1.0.0", Stage::Evaluation);
    let merge = stage_id("1", Stage::Merge);
    assert!(initial < evaluation);
    assert!(evaluation < in_block);
    assert!(in_block < merge);

    let ids = AssignmentIds::new(in_block.clone());
    assert!(ids.latest_is_after(&evaluation));
    assert!(!AssignmentIds::new(evaluation.clone()).latest_is_after(&evaluation));
}

/// A delayed field value resolves in a later iteration; the fixpoint loop
/// re-runs the pass until the container's value is concrete everywhere.
#[test]
fn test_fixpoint_resolves_delay_in_second_iteration() {
    init_tracing();
    let cat = PropertyCatalogue::standard();
    let f = Variable::Field {
        owner: "T".to_string(),
        name: "f".to_string(),
        scope: Box::new(Variable::This {
            type_name: "T".to_string(),
        }),
        is_static: false,
    };

    let mut data = VariableData::new();
    let id = data
        .new_variable(f.clone(), Location::new("T.m", "0"), VariableNature::Normal, false, &cat)
        .unwrap();
    data.ensure_evaluation(id, AssignmentIds::not_yet_assigned(), stage_id("0", Stage::Evaluation), BTreeSet::new());

    let driver = FixpointDriver::new(AnalyserConfig::default());
    let outcome = driver
        .run("T.m", |ctx| {
            if ctx.iteration == 0 {
                // the field analyser has not produced a value yet
                let causes = Causes::from_cause(CauseOfDelay::variable(Cause::FieldValues, Location::new("T.m", "0"), f.clone()));
                let progress = data.set_value(
                    id,
                    Stage::Evaluation,
                    Expr::delayed_variable(f.clone(), causes.clone()),
                    LinkedVariables::delayed(causes.clone()),
                    &Properties::writable(),
                    &cat,
                )?;
                return Ok(AnalysisStatus::from_progress(progress, causes));
            }
            let progress = data.set_value(
                id,
                Stage::Evaluation,
                Expr::IntConst(42),
                LinkedVariables::empty(),
                &decided_value_properties(&cat, 1),
                &cat,
            )?;
            Ok(AnalysisStatus::from_progress(progress, data.delays()))
        })
        .unwrap();

    assert!(matches!(outcome, FixpointOutcome::Fixpoint { .. }));
    assert_eq!(data.current(id).value(), &Expr::IntConst(42));
    // once settled, re-analysis must not retract the value
    assert!(data.current(id).value_is_set());
}

/// Each unit analyses against its own local layer; results become shared
/// only through an explicit add_all, never through the parent.
#[test]
fn test_scope_layering_isolates_concurrent_units() {
    let cat = PropertyCatalogue::standard();
    let global = ScopeLayer::global_with_hardcoded();
    let unit_a = ScopeLayer::local(Arc::clone(&global));
    let unit_b = ScopeLayer::local(Arc::clone(&global));

    // both see the shared, frozen base
    assert!(unit_a.type_analysis("String").is_some());
    assert!(unit_b.type_analysis("String").is_some());

    unit_a.put_method(ElementAnalysis::new("T.a()", [(PropertyCatalogue::CONTEXT_MODIFIED, Dv::FALSE)]));
    assert!(unit_b.method_analysis("T.a()").is_none());
    assert!(global.method_analysis("T.a()").is_none());

    unit_b.add_all(&unit_a);
    let merged = unit_b.method_analysis("T.a()").unwrap();
    assert_eq!(merged.property(PropertyCatalogue::CONTEXT_MODIFIED, &cat), Dv::FALSE);
}

/// A loop counter's equality to a parameter lets the caller's invariant be
/// recovered: i==p && i>=0 && i<=10 becomes i==p && p>=0 && p<=10.
#[test]
fn test_loop_variable_invariant_recovered_for_parameter() {
    use veriprop_core::expr::CmpOp;

    let cat = PropertyCatalogue::standard();
    let ev = BasicEvaluator::default();
    let i = Variable::local("i");
    let p = Variable::parameter("T.m", "p", 0);
    let engine = MergeEngine::new(&cat, &ev, Location::new("T.m", "2")).with_loop_variable(i.clone());

    let condition = Expr::equals(Expr::variable(i.clone()), Expr::variable(p.clone()));
    let state = Expr::and([
        condition.clone(),
        Expr::cmp(CmpOp::Ge, Expr::variable(i.clone()), Expr::IntConst(0)),
        Expr::cmp(CmpOp::Le, Expr::variable(i.clone()), Expr::IntConst(10)),
        // does not mention the loop variable: dropped
        Expr::variable(Variable::local("unrelated")),
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
    assert!(!rewritten.mentions(&Variable::local("unrelated")));
}

/// Monotonicity across iterations: a concrete value never changes, and a
/// second merge of identical sources is an idempotent no-op.
#[test]
fn test_repeated_merge_is_idempotent() {
    let cat = PropertyCatalogue::standard();
    let ev = BasicEvaluator::default();
    let x = Variable::local("x");
    let b = Expr::variable(Variable::local("b"));

    let mut data = VariableData::new();
    let at_0 = data
        .new_variable(x.clone(), Location::new("T.m", "0"), VariableNature::Normal, false, &cat)
        .unwrap();
    data.ensure_evaluation(at_0, AssignmentIds::new(stage_id("0", Stage::Evaluation)), NOT_YET, BTreeSet::new());
    data.set_value(at_0, Stage::Evaluation, Expr::IntConst(1), LinkedVariables::empty(), &decided_value_properties(&cat, 1), &cat)
        .unwrap();
    let at_1 = data.existing_variable(at_0, Location::new("T.m", "1"), false, true);

    let engine = MergeEngine::new(&cat, &ev, Location::new("T.m", "1"));
    let sources = [
        MergeSource::new(b.clone(), branch_snapshot(&cat, "1.0.0", x.clone(), Expr::IntConst(3))),
        MergeSource::new(b.negate(), branch_snapshot(&cat, "1.1.0", x.clone(), Expr::IntConst(5))),
    ];
    assert!(engine.merge_container(&mut data, at_1, true, &sources).unwrap());
    let first = data.current(at_1).value().clone();
    // next iteration repeats the merge with the same inputs
    assert!(!engine.merge_container(&mut data, at_1, true, &sources).unwrap());
    assert_eq!(data.current(at_1).value(), &first);
}
