use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Terminal status of an entry point. Hidden statuses mean "nothing to do"
/// and should not alert anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub outcome: Outcome,
    pub message: String,
    pub hidden: bool,
}

impl Status {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Success,
            message: message.into(),
            hidden: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure,
            message: message.into(),
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.outcome {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        };
        if self.message.is_empty() {
            write!(f, "{label}")
        } else {
            write!(f, "{label}: {}", self.message)
        }
    }
}
