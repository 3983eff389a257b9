//! Structured error types shared across MPP crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`MppError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (mark identifiers, kernel names, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum MppError {
    /// A kernel could not produce a candidate. Never fatal.
    #[error("proposal failure: {0}")]
    Proposal(ErrorInfo),
    /// An energy term was NaN or the voxelization behind it failed.
    #[error("energy calculation failure: {0}")]
    EnergyCalculation(ErrorInfo),
    /// Bookkeeping invariants were violated; the run must halt.
    #[error("configuration inconsistency: {0}")]
    Inconsistency(ErrorInfo),
    /// A feedback receiver failed. Logged and otherwise ignored.
    #[error("feedback failure: {0}")]
    Feedback(ErrorInfo),
    /// Invalid geometry supplied to a mark or voxelizer.
    #[error("geometry error: {0}")]
    Geometry(ErrorInfo),
    /// Invalid run configuration.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Serialization and file errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl MppError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            MppError::Proposal(info)
            | MppError::EnergyCalculation(info)
            | MppError::Inconsistency(info)
            | MppError::Feedback(info)
            | MppError::Geometry(info)
            | MppError::Config(info)
            | MppError::Serde(info) => info,
        }
    }

    /// Returns `true` when the error must stop an optimization run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MppError::Inconsistency(_))
    }

    /// Adds a context entry to whichever payload the error carries.
    pub fn with_context(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match self {
            MppError::Proposal(info) => MppError::Proposal(info.with_context(key, value)),
            MppError::EnergyCalculation(info) => {
                MppError::EnergyCalculation(info.with_context(key, value))
            }
            MppError::Inconsistency(info) => MppError::Inconsistency(info.with_context(key, value)),
            MppError::Feedback(info) => MppError::Feedback(info.with_context(key, value)),
            MppError::Geometry(info) => MppError::Geometry(info.with_context(key, value)),
            MppError::Config(info) => MppError::Config(info.with_context(key, value)),
            MppError::Serde(info) => MppError::Serde(info.with_context(key, value)),
        }
    }
}
