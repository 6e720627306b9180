//! The severity ladder governing report creation and escalation.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Incident severity for a missing-heartbeat report.
///
/// The derived ordering drives escalation: severity may rise across ticks
/// but never falls within the same open report.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The liveness deadline is approaching.
    Warning,
    /// The liveness deadline is imminent.
    Critical,
    /// The liveness deadline has elapsed.
    Abandoned,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Abandoned => "abandoned",
        })
    }
}

/// Health level derived for an agent on each evaluation, including the
/// non-incident healthy state.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    /// The next expected heartbeat has not yet elapsed, or ample time
    /// remains before the hard deadline.
    Healthy,
    /// Remaining time is below the warning threshold.
    Warning,
    /// Remaining time is below the critical threshold.
    Critical,
    /// The hard deadline has elapsed.
    Abandoned,
}

impl HealthLevel {
    /// Returns the incident severity for elevated levels, `None` when
    /// healthy.
    #[must_use]
    pub const fn severity(self) -> Option<Severity> {
        match self {
            Self::Healthy => None,
            Self::Warning => Some(Severity::Warning),
            Self::Critical => Some(Severity::Critical),
            Self::Abandoned => Some(Severity::Abandoned),
        }
    }

    /// Returns `true` for the healthy level.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl Display for HealthLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Abandoned => "abandoned",
        })
    }
}

impl From<Severity> for HealthLevel {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Warning => Self::Warning,
            Severity::Critical => Self::Critical,
            Severity::Abandoned => Self::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_drives_escalation() {
        assert!(Severity::Warning < Severity::Critical);
        assert!(Severity::Critical < Severity::Abandoned);
    }

    #[test]
    fn health_level_maps_to_severity() {
        assert_eq!(HealthLevel::Healthy.severity(), None);
        assert_eq!(HealthLevel::Critical.severity(), Some(Severity::Critical));
        assert_eq!(HealthLevel::from(Severity::Abandoned), HealthLevel::Abandoned);
    }

    #[test]
    fn serde_renders_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Abandoned).unwrap(),
            "\"abandoned\""
        );
    }
}
