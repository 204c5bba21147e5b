//! Run status state machine and the fixed stage sequence.
//!
//! The status fields shown on dashboards are never process-wide globals:
//! they live on the run context object the orchestrator owns, and these
//! helpers are the only way to move between states.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Valid target states reachable from this one. Terminal states return
    /// an empty slice.
    pub fn valid_transitions(&self) -> &'static [RunStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition(&self, to: RunStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a transition, returning a message for invalid ones.
    pub fn validate_transition(&self, to: RunStatus) -> Result<(), String> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} -> {}",
                self.as_str(),
                to.as_str()
            ))
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// The fixed stage sequence of a run. Progress percent after a stage is
/// proportional to its position, so it increases monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Cleaning,
    Rules,
    Kpi,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Extraction,
        Stage::Cleaning,
        Stage::Rules,
        Stage::Kpi,
        Stage::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Cleaning => "cleaning",
            Self::Rules => "rules",
            Self::Kpi => "kpi",
            Self::Export => "export",
        }
    }

    /// Percent complete once this stage has finished.
    pub fn progress_percent(&self) -> u8 {
        let position = Self::ALL.iter().position(|s| s == self).unwrap_or(0) + 1;
        (position * 100 / Self::ALL.len()) as u8
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
