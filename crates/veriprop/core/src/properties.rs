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

//! The property catalogue and the per-variable property map.
//!
//! The catalogue is data the core consumes: a table of property definitions
//! (kind, default, merge operator, grouped flag). The core is parametric over
//! it; `PropertyCatalogue::standard()` provides the table the tests and the
//! default analyses use.
//!
//! `Properties` is an ordered, write-once-per-key-then-freeze map. A decided
//! value can never be silently overwritten by a different decided value; that
//! is a contract violation, not a data condition. An absent entry is distinct
//! from an explicit false and from an explicit delay.

use crate::delay::Causes;
use crate::dv::{Dv, LatticeOp};
use crate::error::{CoreError, CoreResult};
use crate::location::Location;
use crate::variable::Variable;
use std::collections::BTreeMap;
use std::fmt;

/// Classification of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Must be fully decided exactly when the value itself becomes decided.
    Value,
    /// Depends on the context a variable is used in (e.g. modified here).
    Context,
    /// Imposed from outside the current unit (e.g. by a field's analysis).
    External,
}

/// One row of the property catalogue.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: &'static str,
    pub kind: PropertyKind,
    /// The "false"/bottom decision, used absent a better one.
    pub default_value: i32,
    /// Monoid operator for branch merges of this property.
    pub merge_op: LatticeOp,
    /// Grouped properties are clustered across variables by an external
    /// collaborator instead of being merged locally.
    pub grouped: bool,
}

/// Opaque property identifier: an index into the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Property(pub u16);

/// The table of properties the analysis runs over.
#[derive(Debug, Clone)]
pub struct PropertyCatalogue {
    defs: Vec<PropertyDef>,
}

impl PropertyCatalogue {
    pub const NOT_NULL: Property = Property(0);
    pub const IMMUTABLE: Property = Property(1);
    pub const CONTAINER: Property = Property(2);
    pub const INDEPENDENT: Property = Property(3);
    pub const IDENTITY: Property = Property(4);
    pub const CONTEXT_MODIFIED: Property = Property(5);
    pub const CONTEXT_NOT_NULL: Property = Property(6);
    pub const CONTEXT_IMMUTABLE: Property = Property(7);
    pub const EXTERNAL_NOT_NULL: Property = Property(8);
    pub const EXTERNAL_IMMUTABLE: Property = Property(9);

    /// The standard catalogue. The two grouped properties are the context
    /// properties resolved by cross-variable clustering.
    pub fn standard() -> Self {
        let defs = vec![
            PropertyDef {
                name: "NOT_NULL",
                kind: PropertyKind::Value,
                default_value: 0,
                merge_op: LatticeOp::Min,
                grouped: false,
            },
            PropertyDef {
                name: "IMMUTABLE",
                kind: PropertyKind::Value,
                default_value: 0,
                merge_op: LatticeOp::Min,
                grouped: false,
            },
            PropertyDef {
                name: "CONTAINER",
                kind: PropertyKind::Value,
                default_value: 0,
                merge_op: LatticeOp::Min,
                grouped: false,
            },
            PropertyDef {
                name: "INDEPENDENT",
                kind: PropertyKind::Value,
                default_value: 0,
                merge_op: LatticeOp::Min,
                grouped: false,
            },
            PropertyDef {
                name: "IDENTITY",
                kind: PropertyKind::Value,
                default_value: 0,
                merge_op: LatticeOp::Min,
                grouped: false,
            },
            PropertyDef {
                name: "CONTEXT_MODIFIED",
                kind: PropertyKind::Context,
                default_value: 0,
                merge_op: LatticeOp::Max,
                grouped: true,
            },
            PropertyDef {
                name: "CONTEXT_NOT_NULL",
                kind: PropertyKind::Context,
                default_value: 0,
                merge_op: LatticeOp::Max,
                grouped: true,
            },
            PropertyDef {
                name: "CONTEXT_IMMUTABLE",
                kind: PropertyKind::Context,
                default_value: 0,
                merge_op: LatticeOp::Max,
                grouped: false,
            },
            PropertyDef {
                name: "EXTERNAL_NOT_NULL",
                kind: PropertyKind::External,
                default_value: 0,
                merge_op: LatticeOp::Min,
                grouped: false,
            },
            PropertyDef {
                name: "EXTERNAL_IMMUTABLE",
                kind: PropertyKind::External,
                default_value: 0,
                merge_op: LatticeOp::Min,
                grouped: false,
            },
        ];
        Self { defs }
    }

    pub fn def(&self, property: Property) -> &PropertyDef {
        &self.defs[property.0 as usize]
    }

    pub fn name(&self, property: Property) -> &'static str {
        self.def(property).name
    }

    pub fn default_dv(&self, property: Property) -> Dv {
        Dv::decided(self.def(property).default_value)
    }

    pub fn is_value_property(&self, property: Property) -> bool {
        self.def(property).kind == PropertyKind::Value
    }

    pub fn is_group_property(&self, property: Property) -> bool {
        self.def(property).grouped
    }

    pub fn all(&self) -> impl Iterator<Item = Property> + '_ {
        (0..self.defs.len() as u16).map(Property)
    }

    pub fn value_properties(&self) -> impl Iterator<Item = Property> + '_ {
        self.all().filter(|p| self.is_value_property(*p))
    }

    pub fn non_value_properties(&self) -> impl Iterator<Item = Property> + '_ {
        self.all().filter(|p| !self.is_value_property(*p))
    }
}

/// Lifecycle of a `Properties` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
    Writable,
    Frozen,
}

/// Ordered property map with a writable and a frozen lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Properties {
    map: BTreeMap<Property, Dv>,
    state: MapState,
}

impl Default for Properties {
    fn default() -> Self {
        Self::writable()
    }
}

impl Properties {
    pub fn writable() -> Self {
        Self {
            map: BTreeMap::new(),
            state: MapState::Writable,
        }
    }

    pub fn of(pairs: impl IntoIterator<Item = (Property, Dv)>) -> Self {
        Self {
            map: pairs.into_iter().collect(),
            state: MapState::Writable,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state == MapState::Frozen
    }

    /// Seal the map; subsequent writes fail.
    pub fn freeze(&mut self) {
        self.state = MapState::Frozen;
    }

    pub fn frozen(pairs: impl IntoIterator<Item = (Property, Dv)>) -> Self {
        let mut p = Self::of(pairs);
        p.freeze();
        p
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, property: Property) -> bool {
        self.map.contains_key(&property)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Property, &Dv)> {
        self.map.iter()
    }

    /// Raw lookup; `None` is "absent", distinct from false and from delay.
    pub fn get_or_none(&self, property: Property) -> Option<&Dv> {
        self.map.get(&property)
    }

    pub fn get_or_default(&self, property: Property, catalogue: &PropertyCatalogue) -> Dv {
        self.map.get(&property).cloned().unwrap_or_else(|| catalogue.default_dv(property))
    }

    /// Lookup for value properties: absence during analysis is expected and
    /// must stay traceable, so a missing key synthesizes a delay with cause
    /// "awaiting initial value of `variable` at `location`".
    pub fn get_value_property(&self, property: Property, variable: &Variable, location: &Location) -> Dv {
        match self.map.get(&property) {
            Some(dv) => dv.clone(),
            None => Dv::delayed(Causes::initial_value(variable.clone(), location.clone())),
        }
    }

    /// Write-once-per-key semantics:
    /// - narrowing a delay into a decided value is allowed, and is progress;
    /// - rewriting the same decided value is an idempotent no-op;
    /// - rewriting a decided value with a different decided value fails;
    /// - setting a delay is always permitted until the map is frozen (it
    ///   never erases a decided value);
    /// - writing to a frozen map fails.
    ///
    /// Returns whether the write made progress toward a decided value.
    pub fn put(&mut self, property: Property, value: Dv, catalogue: &PropertyCatalogue) -> CoreResult<bool> {
        if self.state == MapState::Frozen {
            return Err(CoreError::FrozenPropertyMap {
                property: catalogue.name(property).to_string(),
            });
        }
        match self.map.get(&property) {
            None => {
                let progress = value.is_done();
                self.map.insert(property, value);
                Ok(progress)
            }
            Some(existing) if existing.is_done() => {
                if value.is_delayed() {
                    // the decided value stands; the delay is absorbed
                    return Ok(false);
                }
                if existing.same_value(&value) {
                    return Ok(false);
                }
                Err(CoreError::PropertyOverwrite {
                    variable: String::new(),
                    property: catalogue.name(property).to_string(),
                    existing: existing.to_string(),
                    attempted: value.to_string(),
                })
            }
            Some(_) => {
                let progress = value.is_done();
                self.map.insert(property, value);
                Ok(progress)
            }
        }
    }

    /// Union of the causes of all still-delayed entries.
    pub fn delays(&self) -> Causes {
        let mut causes = Causes::none();
        for dv in self.map.values() {
            if let Dv::Delayed(c) = dv {
                causes.merge_into(c);
            }
        }
        causes
    }

    /// Copy every entry of `other` into this map under `put` rules, skipping
    /// entries that would overwrite a decided value with a delay.
    pub fn combine_from(&mut self, other: &Properties, catalogue: &PropertyCatalogue) -> CoreResult<bool> {
        let mut progress = false;
        for (p, dv) in other.iter() {
            if self.put(*p, dv.clone(), catalogue)? {
                progress = true;
            }
        }
        Ok(progress)
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (p, dv) in &self.map {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={dv}", p.0)?;
            first = false;
        }
        write!(f, "}}")
    }
}
