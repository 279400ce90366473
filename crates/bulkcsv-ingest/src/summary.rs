//! Run counters and the final summary

use serde::Serialize;
use std::fmt;

/// Counters owned by the orchestrator for a single run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub records_seen: u64,
    pub stored: u64,
    pub rejected: u64,
}

impl RunCounters {
    /// Rows that reached a final outcome (stored or rejected)
    pub fn total(&self) -> u64 {
        self.stored + self.rejected
    }

    pub fn has_activity(&self) -> bool {
        self.records_seen > 0
    }
}

/// How the drain phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The source closed its row channel
    Completed,
    /// The idle window expired; assumed stalled or finished
    Stalled,
    /// Shutdown was requested while draining
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub counters: RunCounters,
    pub termination: Termination,
}

impl RunSummary {
    pub fn records_seen(&self) -> u64 {
        self.counters.records_seen
    }

    pub fn stored(&self) -> u64 {
        self.counters.stored
    }

    pub fn rejected(&self) -> u64 {
        self.counters.rejected
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seen, {} stored, {} rejected",
            self.counters.records_seen, self.counters.stored, self.counters.rejected
        )
    }
}
