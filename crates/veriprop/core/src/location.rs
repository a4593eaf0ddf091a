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

//! Source locations attached to delay causes and contract violations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where something happened: an analysed unit (method, field initializer)
/// plus a statement index inside it ("2.0.1"-style dot-separated path).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub unit: String,
    pub statement: String,
}

impl Location {
    pub fn new(unit: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            statement: statement.into(),
        }
    }

    /// Unit-level location, not tied to a statement.
    pub fn unit(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            statement: String::new(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statement.is_empty() {
            write!(f, "{}", self.unit)
        } else {
            write!(f, "{}:{}", self.unit, self.statement)
        }
    }
}
