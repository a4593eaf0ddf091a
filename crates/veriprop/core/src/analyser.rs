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

//! The iterative pass driver and its break-delay policy.
//!
//! One pass walks a whole unit in a fixed order; the walk repeats until no
//! value moves from delayed to decided anywhere (fixpoint) or the iteration
//! budget runs out. Delay is data, not control flow: a pass never suspends,
//! it records causes and the next iteration consults them. When the same
//! cause set recurs unchanged over a window of iterations, the tracker
//! advises substituting a conservative decision, flagged as approximate.

use crate::delay::Causes;
use crate::dv::Dv;
use crate::error::CoreResult;
use crate::properties::{Property, PropertyCatalogue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Configuration surface of the analyser core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyserConfig {
    /// Maximum number of iterations per unit.
    pub iteration_budget: usize,
    /// Soft bound on expression-rewrite effort.
    pub complexity_limit: usize,
    /// Whether companion-method reasoning is active; opaque to this core.
    pub companion_methods: bool,
    /// Number of consecutive iterations a delay's cause set must stay
    /// identical before a conservative decision may replace it.
    pub break_delay_window: usize,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            iteration_budget: 20,
            complexity_limit: 200,
            companion_methods: false,
            break_delay_window: 3,
        }
    }
}

impl AnalyserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iteration_budget(mut self, budget: usize) -> Self {
        self.iteration_budget = budget;
        self
    }

    pub fn with_complexity_limit(mut self, limit: usize) -> Self {
        self.complexity_limit = limit;
        self
    }

    pub fn with_companion_methods(mut self, active: bool) -> Self {
        self.companion_methods = active;
        self
    }

    pub fn with_break_delay_window(mut self, window: usize) -> Self {
        self.break_delay_window = window;
        self
    }
}

/// Outcome of one pass, or of one analysis step within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStatus {
    /// Everything decided; no further iteration needed.
    Done,
    /// Something moved from delayed toward decided this iteration.
    Progress,
    /// Nothing moved; these causes block.
    Delayed(Causes),
}

impl AnalysisStatus {
    pub fn from_progress(progress: bool, causes: Causes) -> Self {
        if !causes.is_delayed() {
            AnalysisStatus::Done
        } else if progress {
            AnalysisStatus::Progress
        } else {
            AnalysisStatus::Delayed(causes)
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, AnalysisStatus::Done)
    }

    /// Combine two step outcomes: progress anywhere makes the pass worth
    /// repeating; otherwise delays accumulate.
    pub fn combine(self, other: AnalysisStatus) -> AnalysisStatus {
        match (self, other) {
            (AnalysisStatus::Done, s) | (s, AnalysisStatus::Done) => s,
            (AnalysisStatus::Progress, _) | (_, AnalysisStatus::Progress) => AnalysisStatus::Progress,
            (AnalysisStatus::Delayed(a), AnalysisStatus::Delayed(b)) => AnalysisStatus::Delayed(a.merge(&b)),
        }
    }
}

/// Watches (subject, property) delays across iterations. When the cause-set
/// fingerprint stays identical for `window` consecutive iterations, the
/// delay is considered stuck and a conservative decision may be substituted.
#[derive(Debug)]
pub struct DelayTracker {
    window: usize,
    streaks: BTreeMap<(String, String), (u64, usize)>,
}

impl DelayTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            streaks: BTreeMap::new(),
        }
    }

    /// Record this iteration's causes for one open (subject, property).
    /// Returns true when the delay is stuck and may be broken.
    pub fn record(&mut self, subject: &str, property: &str, causes: &Causes) -> bool {
        let key = (subject.to_string(), property.to_string());
        let fingerprint = causes.fingerprint();
        let entry = self.streaks.entry(key).or_insert((fingerprint, 0));
        if entry.0 == fingerprint {
            entry.1 += 1;
        } else {
            *entry = (fingerprint, 1);
        }
        let stuck = entry.1 >= self.window;
        if stuck {
            debug!(subject, property, streak = entry.1, "delay stuck, advising break");
        }
        stuck
    }

    /// Forget a (subject, property) once it resolves.
    pub fn resolve(&mut self, subject: &str, property: &str) {
        self.streaks.remove(&(subject.to_string(), property.to_string()));
    }

    pub fn should_break(&self, subject: &str, property: &str) -> bool {
        self.streaks
            .get(&(subject.to_string(), property.to_string()))
            .is_some_and(|(_, streak)| *streak >= self.window)
    }

    /// The (subject, property) pairs still open, for incompleteness reports.
    pub fn open_properties(&self) -> Vec<String> {
        self.streaks.keys().map(|(subject, property)| format!("{subject}:{property}")).collect()
    }
}

/// The conservative stand-in for a delay that was broken: the property's
/// default, flagged approximate so it is never mistaken for a proven value.
pub fn break_delay_value(property: Property, catalogue: &PropertyCatalogue) -> Dv {
    Dv::approximate(catalogue.def(property).default_value)
}

/// Handed to each pass: the iteration number and the break-delay tracker.
pub struct PassContext<'a> {
    pub iteration: usize,
    pub tracker: &'a mut DelayTracker,
}

/// A unit that exhausted its iteration budget without reaching fixpoint.
/// Distinct from a contract-violation crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompleteReport {
    pub unit: String,
    pub iterations: usize,
    pub open_properties: Vec<String>,
    pub causes: Vec<String>,
}

impl IncompleteReport {
    /// JSON rendering for the surrounding driver's report output.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for IncompleteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "analysis incomplete for unit {}, properties {} remain open, causes: {}",
            self.unit,
            self.open_properties.join(", "),
            self.causes.join("; ")
        )
    }
}

#[derive(Debug, Clone)]
pub enum FixpointOutcome {
    Fixpoint { iterations: usize },
    Incomplete(IncompleteReport),
}

impl FixpointOutcome {
    pub fn is_fixpoint(&self) -> bool {
        matches!(self, FixpointOutcome::Fixpoint { .. })
    }
}

/// Repeats a pass over one unit until fixpoint or budget exhaustion.
#[derive(Debug, Default)]
pub struct FixpointDriver {
    config: AnalyserConfig,
}

impl FixpointDriver {
    pub fn new(config: AnalyserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn run<F>(&self, unit: &str, mut pass: F) -> CoreResult<FixpointOutcome>
    where
        F: FnMut(&mut PassContext<'_>) -> CoreResult<AnalysisStatus>,
    {
        let mut tracker = DelayTracker::new(self.config.break_delay_window);
        let mut last_causes = Causes::none();
        for iteration in 0..self.config.iteration_budget {
            let mut ctx = PassContext {
                iteration,
                tracker: &mut tracker,
            };
            match pass(&mut ctx)? {
                AnalysisStatus::Done => {
                    info!(unit, iterations = iteration + 1, "fixpoint reached");
                    return Ok(FixpointOutcome::Fixpoint { iterations: iteration + 1 });
                }
                AnalysisStatus::Progress => {
                    debug!(unit, iteration, "progress, repeating pass");
                    last_causes = Causes::none();
                }
                AnalysisStatus::Delayed(causes) => {
                    debug!(unit, iteration, causes = %causes, "no progress");
                    last_causes = causes;
                }
            }
        }
        let report = IncompleteReport {
            unit: unit.to_string(),
            iterations: self.config.iteration_budget,
            open_properties: tracker.open_properties(),
            causes: last_causes.iter().map(|c| c.to_string()).collect(),
        };
        warn!(unit, %report, "iteration budget exhausted");
        Ok(FixpointOutcome::Incomplete(report))
    }
}
