//! Per-unit outcomes and the end-of-run summary

use std::fmt;

use crate::{UnitDescriptor, UnitId};

/// How a unit ended in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Every page was committed (or the cutoff was reached)
    Completed,
    /// Already marked completed before this run
    AlreadyCompleted,
    /// Stopped by an error; the checkpoint is kept for the next run
    Failed {
        /// Error description
        reason: String,
    },
    /// Stopped because no credential had quota left
    Suspended {
        /// Error description
        reason: String,
    },
    /// Stopped by a shutdown request
    Interrupted,
}

impl UnitOutcome {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Completed => "completed",
            UnitOutcome::AlreadyCompleted => "already_completed",
            UnitOutcome::Failed { .. } => "failed",
            UnitOutcome::Suspended { .. } => "suspended",
            UnitOutcome::Interrupted => "interrupted",
        }
    }

    /// Whether the unit is finished for good
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitOutcome::Completed | UnitOutcome::AlreadyCompleted)
    }
}

/// Result of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    /// Unit id
    pub unit_id: UnitId,
    /// Configured name
    pub name: String,
    /// Outcome
    pub outcome: UnitOutcome,
    /// Pages committed in this run
    pub pages: u64,
    /// Records newly written to the sink in this run
    pub records_written: u64,
}

impl UnitReport {
    /// Report for `unit` with nothing committed yet
    pub fn new(unit: &UnitDescriptor, outcome: UnitOutcome) -> Self {
        Self {
            unit_id: unit.id(),
            name: unit.name.clone(),
            outcome,
            pages: 0,
            records_written: 0,
        }
    }
}

/// Outcome of every selected unit, in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Per-unit reports
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    /// Units that are finished
    pub fn completed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.outcome.is_completed())
    }

    /// Units stopped by an error
    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units
            .iter()
            .filter(|u| matches!(u.outcome, UnitOutcome::Failed { .. }))
    }

    /// Units that can be resumed by a later run without an error to fix
    pub fn in_progress(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| {
            matches!(
                u.outcome,
                UnitOutcome::Suspended { .. } | UnitOutcome::Interrupted
            )
        })
    }

    /// Report of one unit
    pub fn get(&self, unit_id: &UnitId) -> Option<&UnitReport> {
        self.units.iter().find(|u| &u.unit_id == unit_id)
    }

    /// Records written across all units
    pub fn records_written(&self) -> u64 {
        self.units.iter().map(|u| u.records_written).sum()
    }

    /// Whether every selected unit is finished
    pub fn all_completed(&self) -> bool {
        self.units.iter().all(|u| u.outcome.is_completed())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} unit(s): {} completed, {} failed, {} in progress, {} record(s) written",
            self.units.len(),
            self.completed().count(),
            self.failed().count(),
            self.in_progress().count(),
            self.records_written()
        )?;

        for unit in self.completed() {
            writeln!(f, "  completed    {} ({})", unit.unit_id, unit.name)?;
        }
        for unit in self.failed() {
            if let UnitOutcome::Failed { reason } = &unit.outcome {
                writeln!(f, "  failed       {} ({}): {reason}", unit.unit_id, unit.name)?;
            }
        }
        for unit in self.in_progress() {
            match &unit.outcome {
                UnitOutcome::Suspended { reason } => writeln!(
                    f,
                    "  in progress  {} ({}): {reason}",
                    unit.unit_id, unit.name
                )?,
                _ => writeln!(
                    f,
                    "  in progress  {} ({}): interrupted",
                    unit.unit_id, unit.name
                )?,
            }
        }
        Ok(())
    }
}
