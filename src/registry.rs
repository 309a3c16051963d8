//! Named store for the digi collections a unit publishes.
use crate::digi::Digi;
use std::collections::HashMap;

/// Collections published per unit, keyed by branch name.
///
/// Publishing under an existing name replaces the previous unit's collection.
#[derive(Debug, Default)]
pub struct DigiRegistry {
    collections: HashMap<String, Vec<Digi>>,
}

impl DigiRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `digis` under `name`.
    pub fn publish(&mut self, name: &str, digis: Vec<Digi>) {
        self.collections.insert(name.to_string(), digis);
    }

    /// Collection published under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&[Digi]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Drops every collection.
    pub fn clear(&mut self) {
        self.collections.clear();
    }
}
