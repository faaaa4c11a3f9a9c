//! ---
//! uah_section: "06-testing"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Shared call journal and fault plan for scripted modules."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use strum::{Display, EnumIter};
use tracing::trace;

/// Ordered record of every hook invoked on scripted modules.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        trace!(entry = %entry, "journal");
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().iter().any(|recorded| recorded == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|recorded| *recorded == entry)
            .count()
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|recorded| recorded == entry)
    }

    /// True when `first` was recorded before `second`.
    pub fn ordered(&self, first: &str, second: &str) -> bool {
        matches!(
            (self.position(first), self.position(second)),
            (Some(a), Some(b)) if a < b
        )
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Hooks that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum FaultPoint {
    ConfigLoad,
    ConfigStart,
    RuntimeInit,
    RuntimeStart,
    /// Runtime starts but never exposes a server manager.
    RuntimeWithoutServer,
    ProtocolInit,
    ProtocolStart,
}

/// Set of armed fault points, shared by every scripted module of one test.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    armed: Arc<Mutex<HashSet<FaultPoint>>>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, point: FaultPoint) -> &Self {
        self.armed.lock().insert(point);
        self
    }

    pub fn disarm(&self, point: FaultPoint) -> &Self {
        self.armed.lock().remove(&point);
        self
    }

    pub fn disarm_all(&self) {
        self.armed.lock().clear();
    }

    pub fn is_armed(&self, point: FaultPoint) -> bool {
        self.armed.lock().contains(&point)
    }

    /// Fail with a scripted error when `point` is armed.
    pub fn check(&self, point: FaultPoint) -> Result<()> {
        if self.is_armed(point) {
            bail!("scripted fault at {point}");
        }
        Ok(())
    }
}
