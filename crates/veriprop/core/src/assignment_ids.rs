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

//! Evaluation stages and assignment/read timestamps.
//!
//! A timestamp is a statement-tree path (dot-separated block indices) plus a
//! stage suffix, totally ordered lexicographically. The suffix characters are
//! chosen against `.` (0x2E): `-` (0x2D) sorts before it and `:` (0x3A) after
//! it, so for any statement the Initial and Evaluation stages come before all
//! of its sub-blocks and the Merge stage comes after them.

use std::collections::BTreeSet;
use std::fmt;

/// Timestamp of a variable that has not been assigned or read yet; sorts
/// before every real statement index.
pub const NOT_YET: &str = "-";

/// The three evaluation stages of one program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Initial,
    Evaluation,
    Merge,
}

impl Stage {
    pub const fn suffix(self) -> &'static str {
        match self {
            Stage::Initial => "-C",
            Stage::Evaluation => "-E",
            Stage::Merge => ":M",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Timestamp for `statement_index` at `stage`.
pub fn stage_id(statement_index: &str, stage: Stage) -> String {
    format!("{statement_index}{}", stage.suffix())
}

/// Strip the stage suffix, leaving the statement-tree path.
pub fn statement_path(id: &str) -> &str {
    match id.find(['-', ':']) {
        Some(pos) => &id[..pos],
        None => id,
    }
}

/// True when the statement of `id` lies strictly inside the statement with
/// path `parent`: the parent path must be a strict prefix followed by `.`.
pub fn is_nested_in(id: &str, parent: &str) -> bool {
    let path = statement_path(id);
    path.len() > parent.len() && path.starts_with(parent) && path.as_bytes()[parent.len()] == b'.'
}

/// The set of assignment timestamps of one variable.
///
/// A set, not a scalar: branch merges may need to remember several incoming
/// assignment points. The latest assignment is the lexicographic maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentIds {
    ids: BTreeSet<String>,
}

impl AssignmentIds {
    /// Not assigned yet.
    pub fn not_yet_assigned() -> Self {
        Self::default()
    }

    pub fn new(id: impl Into<String>) -> Self {
        let mut ids = BTreeSet::new();
        ids.insert(id.into());
        Self { ids }
    }

    /// Union of the given sets plus the merge timestamp itself.
    pub fn merged<'a>(merge_id: impl Into<String>, sets: impl Iterator<Item = &'a AssignmentIds>) -> Self {
        let mut ids: BTreeSet<String> = sets.flat_map(|s| s.ids.iter().cloned()).collect();
        ids.insert(merge_id.into());
        Self { ids }
    }

    pub fn is_not_yet_assigned(&self) -> bool {
        self.ids.is_empty()
    }

    /// Lexicographically maximal timestamp; `NOT_YET` when unassigned.
    pub fn latest(&self) -> &str {
        self.ids.iter().next_back().map(String::as_str).unwrap_or(NOT_YET)
    }

    /// Did any assignment happen strictly after `id`?
    pub fn latest_is_after(&self, id: &str) -> bool {
        self.latest() > id
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl fmt::Display for AssignmentIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ids.is_empty() {
            return write!(f, "{NOT_YET}");
        }
        let joined: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        write!(f, "{}", joined.join(","))
    }
}
