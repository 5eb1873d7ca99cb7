//! Lifecycle states for the registry singleton and for individual module loads.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Initialization state of the process-wide registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryState {
    Uninitialized,
    Initializing,
    Ready,
}

impl RegistryState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }
}

/// Atomic holder for a [`RegistryState`]. Transitions only move forward.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(RegistryState::Uninitialized as u8))
    }

    pub(crate) fn get(&self) -> RegistryState {
        RegistryState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn advance(&self, to: RegistryState) {
        self.0.fetch_max(to as u8, Ordering::AcqRel);
    }
}

/// Where a catalog module stands from the loader's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Pending,
    Loading,
    Registered,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_never_moves_backwards() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), RegistryState::Uninitialized);
        cell.advance(RegistryState::Ready);
        cell.advance(RegistryState::Initializing);
        assert_eq!(cell.get(), RegistryState::Ready);
    }
}
