//! Cancellation request state machine and strategy vocabulary.
//!
//! Statuses and methods are persisted as lowercase text (see the
//! `cancellation_requests` CHECK constraints), so every enum here
//! round-trips through [`as_str`](CancellationStatus::as_str) and
//! [`FromStr`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl CancellationStatus {
    /// Statuses that still admit writes.
    pub const ACTIVE: [CancellationStatus; 2] = [Self::Pending, Self::InProgress];

    /// Statuses after which the row is frozen.
    pub const TERMINAL: [CancellationStatus; 3] = [Self::Completed, Self::Failed, Self::Cancelled];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for CancellationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancellationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::Validation(format!(
                "Unknown cancellation status '{other}'"
            ))),
        }
    }
}

/// Returns `true` if `from -> to` is an edge of the request state machine.
///
/// ```text
/// pending     --claim-->   in_progress
/// in_progress --success--> completed
/// in_progress --exhaust--> failed
/// pending|in_progress --cancel--> cancelled
/// ```
pub fn can_transition(from: CancellationStatus, to: CancellationStatus) -> bool {
    use CancellationStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (Pending, Cancelled)
            | (InProgress, Cancelled)
    )
}

/// Validate a transition, returning `InvalidTransition` if the edge does not exist.
pub fn validate_transition(
    from: CancellationStatus,
    to: CancellationStatus,
) -> Result<(), CoreError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

// ---------------------------------------------------------------------------
// Strategy / method
// ---------------------------------------------------------------------------

/// A concrete cancellation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationMethod {
    Api,
    Automation,
    Manual,
}

impl CancellationMethod {
    /// Fallback order used when the caller lets the orchestrator choose.
    pub const PRIORITY: [CancellationMethod; 3] = [Self::Api, Self::Automation, Self::Manual];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Automation => "automation",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for CancellationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancellationMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "automation" => Ok(Self::Automation),
            "manual" => Ok(Self::Manual),
            other => Err(CoreError::Validation(format!(
                "Unknown cancellation method '{other}'"
            ))),
        }
    }
}

/// The `method` column: a pinned strategy or `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MethodSelection {
    /// The orchestrator walks [`CancellationMethod::PRIORITY`].
    #[default]
    Auto,
    /// Only this strategy is tried; exhausting it fails the request.
    Pinned(CancellationMethod),
}

impl MethodSelection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pinned(method) => method.as_str(),
        }
    }

    /// Ordered strategies to attempt, restricted to those the provider supports.
    ///
    /// A pinned method is returned even if it is not applicable; the
    /// orchestrator reports that as a permanent failure rather than
    /// silently swapping strategies.
    pub fn plan(self, applicable: &[CancellationMethod]) -> Vec<CancellationMethod> {
        match self {
            Self::Pinned(method) => vec![method],
            Self::Auto => CancellationMethod::PRIORITY
                .into_iter()
                .filter(|m| applicable.contains(m))
                .collect(),
        }
    }
}

impl fmt::Display for MethodSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodSelection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            other => other.parse().map(Self::Pinned),
        }
    }
}

impl Serialize for MethodSelection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MethodSelection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Log level
// ---------------------------------------------------------------------------

/// Severity of a `cancellation_logs` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(CoreError::Validation(format!("Unknown log level '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration aggregate
// ---------------------------------------------------------------------------

/// Derived status of a batch of requests. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    InProgress,
    Completed,
    Failed,
}

/// Derive the aggregate status of an orchestration from its members.
///
/// `failed` once any member failed and none is still active, `completed`
/// only when every member completed, otherwise `in_progress`. An empty
/// orchestration is `in_progress`.
pub fn aggregate_status(members: &[CancellationStatus]) -> OrchestrationStatus {
    let any_active = members.iter().any(|s| s.is_active());
    let any_failed = members.contains(&CancellationStatus::Failed);

    if any_failed && !any_active {
        OrchestrationStatus::Failed
    } else if !members.is_empty() && members.iter().all(|s| *s == CancellationStatus::Completed) {
        OrchestrationStatus::Completed
    } else {
        OrchestrationStatus::InProgress
    }
}
