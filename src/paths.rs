use serde::{Deserialize, Serialize};

use crate::error::{AvmuError, AvmuResult};
use crate::types::{Path, SweepRecord, SwitchboardType};

/// Default limit on simultaneously registered paths.
pub const DEFAULT_PATH_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    Requested,
    Measured,
    NoData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathEntry {
    pub path: Path,
    pub status: PathStatus,
    pub sweep: Option<SweepRecord>,
}

/// Paths to measure, in the order they were added, with their latest result.
#[derive(Debug, Clone)]
pub struct PathRegistry {
    entries: Vec<PathEntry>,
    limit: usize,
    switchboard: SwitchboardType,
}

impl Default for PathRegistry {
    fn default() -> Self {
        Self::new(SwitchboardType::Simple4Port)
    }
}

impl PathRegistry {
    pub fn new(switchboard: SwitchboardType) -> Self {
        Self::with_limit(switchboard, DEFAULT_PATH_LIMIT)
    }

    pub fn with_limit(switchboard: SwitchboardType, limit: usize) -> Self {
        PathRegistry { entries: Vec::new(), limit, switchboard }
    }

    pub fn add_path(&mut self, path: Path) -> AvmuResult<()> {
        if !self.switchboard.supports(&path) {
            return Err(AvmuError::InvalidPath(path));
        }
        if self.position(&path).is_some() {
            return Err(AvmuError::DuplicatePath(path));
        }
        if self.entries.len() >= self.limit {
            return Err(AvmuError::TooManyPaths { limit: self.limit });
        }
        self.entries.push(PathEntry { path, status: PathStatus::Requested, sweep: None });
        Ok(())
    }

    pub fn clear_paths(&mut self) {
        self.entries.clear();
    }

    /// Return every entry to Requested and drop captured sweeps.
    pub fn clear_results(&mut self) {
        for entry in &mut self.entries {
            entry.status = PathStatus::Requested;
            entry.sweep = None;
        }
    }

    pub fn mark_measured(&mut self, path: &Path, sweep: SweepRecord) -> AvmuResult<()> {
        let entry = self.requested_entry(path)?;
        entry.status = PathStatus::Measured;
        entry.sweep = Some(sweep);
        Ok(())
    }

    pub fn mark_no_data(&mut self, path: &Path) -> AvmuResult<()> {
        let entry = self.requested_entry(path)?;
        entry.status = PathStatus::NoData;
        entry.sweep = None;
        Ok(())
    }

    fn requested_entry(&mut self, path: &Path) -> AvmuResult<&mut PathEntry> {
        let idx = self.position(path).ok_or(AvmuError::UnknownPath(*path))?;
        let entry = &mut self.entries[idx];
        if entry.status != PathStatus::Requested {
            return Err(AvmuError::PathAlreadyMeasured { path: *path });
        }
        Ok(entry)
    }

    pub fn extract_path(&self, path: &Path) -> AvmuResult<SweepRecord> {
        let entry = self.get(path).ok_or(AvmuError::UnknownPath(*path))?;
        match (&entry.status, &entry.sweep) {
            (PathStatus::Measured, Some(sweep)) => Ok(sweep.clone()),
            _ => Err(AvmuError::PathHasNoData(*path)),
        }
    }

    pub fn extract_all_paths(&self) -> Vec<(Path, SweepRecord)> {
        self.entries
            .iter()
            .filter(|e| e.status == PathStatus::Measured)
            .filter_map(|e| e.sweep.clone().map(|s| (e.path, s)))
            .collect()
    }

    pub fn get(&self, path: &Path) -> Option<&PathEntry> {
        self.entries.iter().find(|e| e.path == *path)
    }

    pub fn path_at(&self, index: usize) -> AvmuResult<Path> {
        self.entries
            .get(index)
            .map(|e| e.path)
            .ok_or(AvmuError::IndexOutOfBounds { index, len: self.entries.len() })
    }

    pub fn requested(&self) -> Vec<Path> {
        self.entries
            .iter()
            .filter(|e| e.status == PathStatus::Requested)
            .map(|e| e.path)
            .collect()
    }

    pub fn paths(&self) -> Vec<Path> {
        self.entries.iter().map(|e| e.path).collect()
    }

    pub fn count(&self, status: PathStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|e| e.path == *path)
    }
}
