// Lifecycle of one module instance
//
// Unresolved -> Resolved -> Allocated -> Initialized -> Performing* -> Freed

use crate::module::{ModuleError, ModuleResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Native sample representation of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit float (`Omni_UGenInit32` / `Omni_UGenPerform32`)
    Single,
    /// 64-bit float (`Omni_UGenInit64` / `Omni_UGenPerform64`)
    Double,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Single => write!(f, "32-bit"),
            Precision::Double => write!(f, "64-bit"),
        }
    }
}

/// Where an instance stands in the allocate -> init -> perform -> free sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No module table available
    Unresolved,
    /// Table available, nothing allocated yet
    Resolved,
    /// Handle obtained, not yet initialized
    Allocated,
    /// Initialized for one precision, no block processed yet
    Initialized(Precision),
    /// At least one block processed
    Performing(Precision),
    /// Terminal
    Freed,
}

impl LifecycleState {
    /// Precision fixed by a successful initialize, if any
    pub fn precision(&self) -> Option<Precision> {
        match self {
            LifecycleState::Initialized(p) | LifecycleState::Performing(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            LifecycleState::Allocated
                | LifecycleState::Initialized(_)
                | LifecycleState::Performing(_)
        )
    }

    pub fn on_allocate(self) -> ModuleResult<Self> {
        match self {
            LifecycleState::Resolved => Ok(LifecycleState::Allocated),
            state => Err(ModuleError::InvalidState {
                state,
                operation: "allocate",
            }),
        }
    }

    pub fn on_initialize(self, precision: Precision) -> ModuleResult<Self> {
        match self {
            LifecycleState::Allocated => Ok(LifecycleState::Initialized(precision)),
            state => Err(ModuleError::InvalidState {
                state,
                operation: "initialize",
            }),
        }
    }

    pub fn on_perform(self, requested: Precision) -> ModuleResult<Self> {
        match self {
            LifecycleState::Initialized(initialized) | LifecycleState::Performing(initialized) => {
                if initialized == requested {
                    Ok(LifecycleState::Performing(initialized))
                } else {
                    Err(ModuleError::PrecisionMismatch {
                        initialized,
                        requested,
                    })
                }
            }
            state => Err(ModuleError::InvalidState {
                state,
                operation: "perform",
            }),
        }
    }

    pub fn on_free(self) -> ModuleResult<Self> {
        if self.is_live() {
            Ok(LifecycleState::Freed)
        } else {
            Err(ModuleError::InvalidState {
                state: self,
                operation: "free",
            })
        }
    }
}
