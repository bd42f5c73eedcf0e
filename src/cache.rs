//! In-memory caches shared between the background engine and its readers.
//!
//! This module provides the `StatsCache` holding the latest metrics sample per
//! container and the `UpdateCache` holding the "newer image available" flag.
//! Both are plain maps behind short-lived locks; readers never wait on a fetch.

use ahash::AHashMap as HashMap;
use ahash::AHashSet as HashSet;
use std::sync::{PoisonError, RwLock};

use crate::stats::StatsSample;

/// Latest computed sample per container id.
#[derive(Default)]
pub struct StatsCache {
    samples: RwLock<HashMap<String, StatsSample>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<StatsSample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Stores `sample` as the latest one for `id`. Fetches that outlive their
    /// timeout are dropped before they get here, so the last write wins.
    pub fn insert(&self, id: &str, sample: StatsSample) {
        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), sample);
    }

    /// Drops every entry whose id is not in `running`. Returns how many were
    /// removed.
    pub fn retain_running(&self, running: &HashSet<String>) -> usize {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let before = samples.len();
        samples.retain(|id, _| running.contains(id));
        before - samples.len()
    }

    /// Copy of all entries, for exporters.
    pub fn snapshot(&self) -> Vec<(String, StatsSample)> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-container flag: `true` when a newer image digest exists for the tag
/// the container runs. Absent means not yet known.
#[derive(Default)]
pub struct UpdateCache {
    flags: RwLock<HashMap<String, bool>>,
}

impl UpdateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<bool> {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    pub fn set(&self, id: &str, has_update: bool) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), has_update);
    }

    pub fn snapshot(&self) -> Vec<(String, bool)> {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, v)| (id.clone(), *v))
            .collect()
    }
}
