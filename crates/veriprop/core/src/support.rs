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

//! Small single-transition containers used throughout the analyser state.
//!
//! `EventuallyFinal` holds a value that may be rewritten while provisional and
//! becomes immutable once finalized; `SetOnce` accepts exactly one write;
//! `FlipSwitch` is a monotonic boolean. The containers enforce their
//! transition rules by type, not by runtime flags scattered over callers.

use thiserror::Error;

/// Violation of a single-transition container's contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("value is final, cannot overwrite with a different value")]
    AlreadyFinal,
    #[error("value already set")]
    AlreadySet,
}

/// A value that is mutable while provisional ("variable") and immutable once
/// finalized. The only allowed transition is variable -> final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventuallyFinal<T> {
    value: T,
    finalized: bool,
}

impl<T: PartialEq> EventuallyFinal<T> {
    /// Start in the provisional state.
    pub fn variable(value: T) -> Self {
        Self { value, finalized: false }
    }

    /// Start directly in the final state.
    pub fn final_value(value: T) -> Self {
        Self { value, finalized: true }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn is_final(&self) -> bool {
        self.finalized
    }

    pub fn is_variable(&self) -> bool {
        !self.finalized
    }

    /// Overwrite the provisional value. Fails when already final, unless the
    /// new value is equal to the final one (idempotent writes are harmless).
    /// Returns whether the stored value changed.
    pub fn set_variable(&mut self, value: T) -> Result<bool, TransitionError> {
        if self.finalized {
            if self.value == value {
                return Ok(false);
            }
            return Err(TransitionError::AlreadyFinal);
        }
        let changed = self.value != value;
        self.value = value;
        Ok(changed)
    }

    /// Transition to the final state. Setting the same final value twice is a
    /// no-op; a different value is a contract violation.
    /// Returns whether this call made progress (provisional -> final).
    pub fn set_final(&mut self, value: T) -> Result<bool, TransitionError> {
        if self.finalized {
            if self.value == value {
                return Ok(false);
            }
            return Err(TransitionError::AlreadyFinal);
        }
        self.value = value;
        self.finalized = true;
        Ok(true)
    }
}

/// A slot written at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOnce<T> {
    value: Option<T>,
}

impl<T> SetOnce<T> {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    pub fn set(&mut self, value: T) -> Result<(), TransitionError> {
        if self.value.is_some() {
            return Err(TransitionError::AlreadySet);
        }
        self.value = Some(value);
        Ok(())
    }

    /// Write only when nothing has been set yet; never fails.
    pub fn set_if_absent(&mut self, value: T) -> bool {
        if self.value.is_none() {
            self.value = Some(value);
            return true;
        }
        false
    }
}

/// A boolean that can only move from unset to set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlipSwitch {
    set: bool,
}

impl FlipSwitch {
    pub fn new() -> Self {
        Self { set: false }
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    /// Returns true when this call flipped the switch.
    pub fn set(&mut self) -> bool {
        let flipped = !self.set;
        self.set = true;
        flipped
    }
}
