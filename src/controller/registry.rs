//! Ordered, build-once collection of checkers

use super::checker::Checker;
use crate::crd::khstate::khstate_name;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A check named {0:?} is already registered")]
    DuplicateName(String),

    #[error("Checks {0:?} and {1:?} would share khstate {2:?}")]
    StateNameCollision(String, String, String),
}

/// Registered checkers in registration order
///
/// Populated during startup and shared read-only (`Arc<CheckRegistry>`)
/// afterwards. Entries are never removed.
#[derive(Default)]
pub struct CheckRegistry {
    checkers: Vec<Arc<dyn Checker>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a checker; a name collision leaves the existing entry in place
    ///
    /// Two different names that map to the same khstate resource are
    /// rejected too, since their persisted results would overwrite each other.
    pub fn register(&mut self, checker: Arc<dyn Checker>) -> Result<(), RegistryError> {
        let name = checker.name();
        if self.contains(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }

        let state_name = khstate_name(name);
        if let Some(existing) = self
            .checkers
            .iter()
            .find(|c| khstate_name(c.name()) == state_name)
        {
            return Err(RegistryError::StateNameCollision(
                existing.name().to_string(),
                name.to_string(),
                state_name,
            ));
        }
        self.checkers.push(checker);
        Ok(())
    }

    pub fn list(&self) -> &[Arc<dyn Checker>] {
        &self.checkers
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.checkers.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.checkers.iter().any(|c| c.name() == name)
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

impl std::fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.checkers.iter().map(|c| c.name()))
            .finish()
    }
}
