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

//! Contract violations of the analyser core.
//!
//! These are programming errors in the analysis itself, fatal for the current
//! unit's pass. Analytical incompleteness is never represented here: a
//! property that cannot yet be decided is a delayed `Dv`, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("value of {variable} at {location} already decided as '{existing}', refusing '{attempted}'")]
    ValueOverwrite {
        variable: String,
        location: String,
        existing: String,
        attempted: String,
    },

    #[error("property {property} of {variable} already decided as {existing}, refusing {attempted}")]
    PropertyOverwrite {
        variable: String,
        property: String,
        existing: String,
        attempted: String,
    },

    #[error("write of {property} to a frozen property map")]
    FrozenPropertyMap { property: String },

    #[error("delayed write to value property {property} of {variable} whose value is already decided")]
    DelayOnValueProperty { variable: String, property: String },

    #[error("merge stage requested for {variable} at {location}: statement has no sub-blocks")]
    MergeWithoutSubBlocks { variable: String, location: String },

    #[error("no merge sources for {variable} while at least one block is guaranteed to execute")]
    EmptyMergeSources { variable: String },

    #[error("merge of {variable} reached under an unreachable (always-false) state")]
    UnreachableMerge { variable: String },

    #[error("initial-stage write to {variable}: container is not recursively initial")]
    NotAnInitialWrite { variable: String },

    #[error("stage {stage} of {variable} written twice")]
    StageAlreadySet { variable: String, stage: String },

    #[error("stage {stage} of {variable} not materialized yet")]
    StageNotPresent { variable: String, stage: String },

    #[error("linked variables of {variable} already final, refusing different aliasing set")]
    LinkedVariablesOverwrite { variable: String },

    #[error("property override {property} of {variable} already set to {existing}, refusing {attempted}")]
    OverrideOverwrite {
        variable: String,
        property: String,
        existing: String,
        attempted: String,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;
