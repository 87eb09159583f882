//! Failure classification: tooling mistake or application defect.
//!
//! This is a message-matching heuristic over a configurable vocabulary, not a
//! guarantee. An application that prints "timeout" in its own error banner
//! will be classified as a selector problem.

use crate::config::{vocab, Vocabulary};
use crate::Error;
use serde::Serialize;

/// Probable origin of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The locator or the engine's timing was wrong.
    Selector,
    /// The application itself misbehaved.
    Application,
}

impl FailureKind {
    /// Classify a failure message.
    pub fn classify(message: &str, vocab: &Vocabulary) -> Self {
        if vocab::mentions_any(message, &vocab.selector_errors) {
            Self::Selector
        } else {
            Self::Application
        }
    }

    /// Classify an error, using its variant before falling back to its message.
    pub fn of(err: &Error, vocab: &Vocabulary) -> Self {
        match err {
            Error::ResolutionFailed { .. } | Error::StepTimeout { .. } => Self::Selector,
            Error::VerificationFailed(_) | Error::LoginFailed(_) => Self::Application,
            other => Self::classify(&other.to_string(), vocab),
        }
    }
}
