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

//! The decided-or-delayed lattice value.
//!
//! A `Dv` is either a decided ordinal (boolean rank 0/1, or a richer per-
//! property ordinal) or a delayed value carrying causes. `min`/`max` over a
//! delayed operand always yields a delayed result whose causes are the union
//! of the delayed inputs' causes; decided inputs contribute no causes.
//!
//! Decided values substituted by break-delay are marked approximate so they
//! stay distinguishable from proven decisions.

use crate::delay::Causes;
use std::fmt;

/// Lattice combination operator, with its fold identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatticeOp {
    Min,
    Max,
}

impl LatticeOp {
    /// Identity element for folds: never survives into a decided result
    /// because every real value replaces it.
    pub const fn identity(self) -> Dv {
        match self {
            LatticeOp::Min => Dv::MAX_IDENTITY,
            LatticeOp::Max => Dv::MIN_IDENTITY,
        }
    }
}

/// A lattice value: decided ordinal or delay-with-causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dv {
    Decided { value: i32, approximate: bool },
    Delayed(Causes),
}

impl Dv {
    /// Boolean rank false / bottom.
    pub const FALSE: Dv = Dv::Decided {
        value: 0,
        approximate: false,
    };
    /// Boolean rank true.
    pub const TRUE: Dv = Dv::Decided {
        value: 1,
        approximate: false,
    };
    /// Fold identity for `max`.
    pub const MIN_IDENTITY: Dv = Dv::Decided {
        value: i32::MIN,
        approximate: false,
    };
    /// Fold identity for `min`.
    pub const MAX_IDENTITY: Dv = Dv::Decided {
        value: i32::MAX,
        approximate: false,
    };

    pub const fn decided(value: i32) -> Dv {
        Dv::Decided {
            value,
            approximate: false,
        }
    }

    /// A conservative decision substituted for an unresolvable delay.
    pub const fn approximate(value: i32) -> Dv {
        Dv::Decided {
            value,
            approximate: true,
        }
    }

    pub fn delayed(causes: Causes) -> Dv {
        debug_assert!(causes.is_delayed(), "a delayed DV needs at least one cause");
        Dv::Delayed(causes)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Dv::Decided { .. })
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, Dv::Delayed(_))
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self, Dv::Decided { approximate: true, .. })
    }

    pub fn value(&self) -> Option<i32> {
        match self {
            Dv::Decided { value, .. } => Some(*value),
            Dv::Delayed(_) => None,
        }
    }

    /// Causes of delay; empty for decided values.
    pub fn causes(&self) -> Causes {
        match self {
            Dv::Decided { .. } => Causes::none(),
            Dv::Delayed(causes) => causes.clone(),
        }
    }

    /// Equality on the decided ordinal, ignoring the approximate flag.
    pub fn same_value(&self, other: &Dv) -> bool {
        match (self, other) {
            (Dv::Decided { value: a, .. }, Dv::Decided { value: b, .. }) => a == b,
            _ => false,
        }
    }

    pub fn min(&self, other: &Dv) -> Dv {
        Dv::combine(self, other, LatticeOp::Min)
    }

    pub fn max(&self, other: &Dv) -> Dv {
        Dv::combine(self, other, LatticeOp::Max)
    }

    /// `op` over decided operands; a delayed result with the union of the
    /// delayed operands' causes otherwise.
    pub fn combine(a: &Dv, b: &Dv, op: LatticeOp) -> Dv {
        match (a, b) {
            (
                Dv::Decided {
                    value: va,
                    approximate: pa,
                },
                Dv::Decided {
                    value: vb,
                    approximate: pb,
                },
            ) => {
                let (value, from_a) = match op {
                    LatticeOp::Min => (*va.min(vb), va <= vb),
                    LatticeOp::Max => (*va.max(vb), va >= vb),
                };
                // the approximate taint travels with the chosen operand
                let approximate = if va == vb { *pa || *pb } else if from_a { *pa } else { *pb };
                Dv::Decided { value, approximate }
            }
            (Dv::Delayed(ca), Dv::Delayed(cb)) => Dv::Delayed(ca.merge(cb)),
            (Dv::Delayed(c), Dv::Decided { .. }) | (Dv::Decided { .. }, Dv::Delayed(c)) => Dv::Delayed(c.clone()),
        }
    }

    /// Fold an iterator with `op`, starting from the op's identity.
    pub fn fold<'a>(op: LatticeOp, values: impl Iterator<Item = &'a Dv>) -> Dv {
        values.fold(op.identity(), |acc, v| Dv::combine(&acc, v, op))
    }
}

impl fmt::Display for Dv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dv::Decided { value, approximate } => {
                if *approximate {
                    write!(f, "~{value}")
                } else {
                    write!(f, "{value}")
                }
            }
            Dv::Delayed(causes) => write!(f, "<delayed:{causes}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::{Cause, CauseOfDelay};
    use crate::location::Location;
    use proptest::prelude::*;

    fn delay(tag: Cause, stmt: &str) -> Dv {
        Dv::delayed(Causes::from_cause(CauseOfDelay::new(tag, Location::new("u", stmt))))
    }

    #[test]
    fn test_min_max_of_decided() {
        let a = Dv::decided(2);
        let b = Dv::decided(5);
        assert_eq!(a.min(&b), Dv::decided(2));
        assert_eq!(a.max(&b), Dv::decided(5));
    }

    #[test]
    fn test_delayed_operand_wins() {
        let d = delay(Cause::Condition, "0");
        let a = Dv::decided(2);
        assert!(a.min(&d).is_delayed());
        assert!(d.max(&a).is_delayed());
        // decided operand contributes no causes
        assert_eq!(a.min(&d).causes(), d.causes());
    }

    #[test]
    fn test_delay_causes_are_unioned() {
        let d1 = delay(Cause::Condition, "0");
        let d2 = delay(Cause::InitialValue, "1");
        let out = d1.min(&d2);
        let causes = out.causes();
        assert_eq!(causes.len(), 2);
        assert!(causes.contains_cause(Cause::Condition));
        assert!(causes.contains_cause(Cause::InitialValue));
    }

    #[test]
    fn test_fold_identity_never_survives() {
        let values = [Dv::decided(3), Dv::decided(7)];
        assert_eq!(Dv::fold(LatticeOp::Min, values.iter()), Dv::decided(3));
        assert_eq!(Dv::fold(LatticeOp::Max, values.iter()), Dv::decided(7));
    }

    #[test]
    fn test_approximate_taint_travels() {
        let a = Dv::approximate(1);
        let b = Dv::decided(4);
        assert!(a.min(&b).is_approximate());
        assert!(!a.max(&b).is_approximate());
        assert!(a.same_value(&Dv::decided(1)));
        assert_ne!(a, Dv::decided(1));
    }

    proptest! {
        #[test]
        fn prop_combine_never_drops_causes(stmt_a in "[0-9]{1,3}", stmt_b in "[0-9]{1,3}") {
            let d1 = delay(Cause::Condition, &stmt_a);
            let d2 = delay(Cause::Linking, &stmt_b);
            for op in [LatticeOp::Min, LatticeOp::Max] {
                let out = Dv::combine(&d1, &d2, op);
                let causes = out.causes();
                prop_assert!(causes.contains_cause(Cause::Condition));
                prop_assert!(causes.contains_cause(Cause::Linking));
            }
        }

        #[test]
        fn prop_min_max_agree_with_ints(a in -100i32..100, b in -100i32..100) {
            prop_assert_eq!(Dv::decided(a).min(&Dv::decided(b)), Dv::decided(a.min(b)));
            prop_assert_eq!(Dv::decided(a).max(&Dv::decided(b)), Dv::decided(a.max(b)));
        }
    }
}
