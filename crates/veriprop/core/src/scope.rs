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

//! Parent-chained lookup scopes for analysis results.
//!
//! Each layer owns four write-once maps (types, methods, fields, parameters).
//! A lookup miss falls through to the parent; writes always target the local
//! maps and each key is set at most once. Concurrent analyses of independent
//! units each own a local layer over the shared base and merge back with
//! `add_all` once finished, so no layer ever mutates its parent.

use crate::dv::Dv;
use crate::properties::{Properties, Property, PropertyCatalogue};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// The shape of a layer: the global base, a per-unit local layer, or a
/// transient layer for speculative sub-analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Local,
    Transient,
}

/// The finalized analysis result of one program element, keyed by its
/// fully-qualified name. Its property map is frozen on construction.
#[derive(Debug, Clone)]
pub struct ElementAnalysis {
    name: String,
    properties: Properties,
}

impl ElementAnalysis {
    pub fn new(name: impl Into<String>, properties: impl IntoIterator<Item = (Property, Dv)>) -> Self {
        Self {
            name: name.into(),
            properties: Properties::frozen(properties),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(&self, property: Property, catalogue: &PropertyCatalogue) -> Dv {
        self.properties.get_or_default(property, catalogue)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

type AnalysisMap = RwLock<HashMap<String, Arc<ElementAnalysis>>>;

#[derive(Debug)]
pub struct ScopeLayer {
    kind: ScopeKind,
    parent: Option<Arc<ScopeLayer>>,
    types: AnalysisMap,
    methods: AnalysisMap,
    fields: AnalysisMap,
    parameters: AnalysisMap,
}

impl ScopeLayer {
    fn with_kind(kind: ScopeKind, parent: Option<Arc<ScopeLayer>>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            parent,
            types: RwLock::new(HashMap::new()),
            methods: RwLock::new(HashMap::new()),
            fields: RwLock::new(HashMap::new()),
            parameters: RwLock::new(HashMap::new()),
        })
    }

    /// The shared base layer, empty.
    pub fn global() -> Arc<Self> {
        Self::with_kind(ScopeKind::Global, None)
    }

    /// The shared base layer, preloaded with the hardcoded analyses for
    /// library elements that have no analysable source.
    pub fn global_with_hardcoded() -> Arc<Self> {
        let global = Self::global();
        for analysis in hardcoded_type_analyses() {
            global.put_type(analysis);
        }
        for analysis in hardcoded_method_analyses() {
            global.put_method(analysis);
        }
        global
    }

    pub fn local(parent: Arc<ScopeLayer>) -> Arc<Self> {
        Self::with_kind(ScopeKind::Local, Some(parent))
    }

    pub fn transient(parent: Arc<ScopeLayer>) -> Arc<Self> {
        Self::with_kind(ScopeKind::Transient, Some(parent))
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    fn lookup(&self, pick: fn(&ScopeLayer) -> &AnalysisMap, name: &str) -> Option<Arc<ElementAnalysis>> {
        if let Some(found) = pick(self).read().get(name) {
            return Some(Arc::clone(found));
        }
        self.parent.as_ref().and_then(|p| p.lookup(pick, name))
    }

    /// Insert-if-absent into the local map; a repeated write of the same key
    /// is a no-op. Returns whether this call inserted.
    fn insert(&self, pick: fn(&ScopeLayer) -> &AnalysisMap, analysis: ElementAnalysis) -> bool {
        let mut map = pick(self).write();
        if map.contains_key(analysis.name()) {
            return false;
        }
        trace!(name = analysis.name(), kind = ?self.kind, "scope insert");
        map.insert(analysis.name().to_string(), Arc::new(analysis));
        true
    }

    pub fn type_analysis(&self, name: &str) -> Option<Arc<ElementAnalysis>> {
        self.lookup(|l| &l.types, name)
    }

    pub fn method_analysis(&self, name: &str) -> Option<Arc<ElementAnalysis>> {
        self.lookup(|l| &l.methods, name)
    }

    pub fn field_analysis(&self, name: &str) -> Option<Arc<ElementAnalysis>> {
        self.lookup(|l| &l.fields, name)
    }

    pub fn parameter_analysis(&self, name: &str) -> Option<Arc<ElementAnalysis>> {
        self.lookup(|l| &l.parameters, name)
    }

    pub fn put_type(&self, analysis: ElementAnalysis) -> bool {
        self.insert(|l| &l.types, analysis)
    }

    pub fn put_method(&self, analysis: ElementAnalysis) -> bool {
        self.insert(|l| &l.methods, analysis)
    }

    pub fn put_field(&self, analysis: ElementAnalysis) -> bool {
        self.insert(|l| &l.fields, analysis)
    }

    pub fn put_parameter(&self, analysis: ElementAnalysis) -> bool {
        self.insert(|l| &l.parameters, analysis)
    }

    /// Merge a completed sibling's local maps into this layer: a pure,
    /// order-independent union under insert-if-absent.
    pub fn add_all(&self, sibling: &ScopeLayer) {
        for (ours, theirs) in [
            (&self.types, &sibling.types),
            (&self.methods, &sibling.methods),
            (&self.fields, &sibling.fields),
            (&self.parameters, &sibling.parameters),
        ] {
            let mut map = ours.write();
            for (name, analysis) in theirs.read().iter() {
                map.entry(name.clone()).or_insert_with(|| Arc::clone(analysis));
            }
        }
    }
}

/// Fixed lattice answers for library types without source. A keyed table
/// plus `ElementAnalysis`, not subclasses per kind.
fn hardcoded_type_analyses() -> Vec<ElementAnalysis> {
    vec![
        ElementAnalysis::new("String", [
            (PropertyCatalogue::IMMUTABLE, Dv::decided(2)),
            (PropertyCatalogue::CONTAINER, Dv::TRUE),
            (PropertyCatalogue::INDEPENDENT, Dv::TRUE),
        ]),
        ElementAnalysis::new("Integer", [
            (PropertyCatalogue::IMMUTABLE, Dv::decided(2)),
            (PropertyCatalogue::CONTAINER, Dv::TRUE),
            (PropertyCatalogue::INDEPENDENT, Dv::TRUE),
        ]),
        ElementAnalysis::new("Boolean", [
            (PropertyCatalogue::IMMUTABLE, Dv::decided(2)),
            (PropertyCatalogue::CONTAINER, Dv::TRUE),
            (PropertyCatalogue::INDEPENDENT, Dv::TRUE),
        ]),
        ElementAnalysis::new("Object", [(PropertyCatalogue::IMMUTABLE, Dv::decided(0)), (PropertyCatalogue::CONTAINER, Dv::FALSE)]),
    ]
}

fn hardcoded_method_analyses() -> Vec<ElementAnalysis> {
    vec![
        ElementAnalysis::new("String.length()", [
            (PropertyCatalogue::CONTEXT_MODIFIED, Dv::FALSE),
            (PropertyCatalogue::INDEPENDENT, Dv::TRUE),
            (PropertyCatalogue::NOT_NULL, Dv::decided(1)),
        ]),
        ElementAnalysis::new("Object.equals(Object)", [
            (PropertyCatalogue::CONTEXT_MODIFIED, Dv::FALSE),
            (PropertyCatalogue::INDEPENDENT, Dv::TRUE),
        ]),
        ElementAnalysis::new("Object.hashCode()", [
            (PropertyCatalogue::CONTEXT_MODIFIED, Dv::FALSE),
            (PropertyCatalogue::INDEPENDENT, Dv::TRUE),
        ]),
    ]
}
