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

//! Veriprop analyser core
//!
//! This crate computes lattice-valued properties (nullability, immutability,
//! modification, containment, ...) for every variable at every program point,
//! through iterative, possibly-cyclic dataflow analysis. "Not yet known" is a
//! first-class, traceable value: a delay with causes, resolved as later
//! iterations supply more information, or broken conservatively when it
//! refuses to shrink.

pub mod analyser;
pub mod assignment_ids;
pub mod container;
pub mod delay;
pub mod dv;
pub mod error;
pub mod expr;
pub mod linked;
pub mod location;
pub mod merge;
pub mod properties;
pub mod scope;
pub mod snapshot;
pub mod support;
pub mod variable;

pub use analyser::{AnalyserConfig, AnalysisStatus, DelayTracker, FixpointDriver, FixpointOutcome, IncompleteReport, PassContext};
pub use assignment_ids::{AssignmentIds, NOT_YET, Stage, stage_id};
pub use container::{ContainerId, VariableContainer, VariableData};
pub use delay::{Cause, CauseOfDelay, Causes};
pub use dv::{Dv, LatticeOp};
pub use error::{CoreError, CoreResult};
pub use expr::{BasicEvaluator, Evaluator, Expr, Simplified, TranslationMap};
pub use linked::{LinkStrength, LinkedVariables};
pub use location::Location;
pub use merge::{GroupPropertyValues, MergeEngine, MergeSource, MergedState};
pub use properties::{Properties, Property, PropertyCatalogue, PropertyDef, PropertyKind};
pub use scope::{ElementAnalysis, ScopeKind, ScopeLayer};
pub use snapshot::VariableSnapshot;
pub use variable::{Variable, VariableNature};
