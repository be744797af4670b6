use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of migrating or creating one model's table.
///
/// Engine operations report failures here instead of returning `Err`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub success: bool,
    pub log: String,
}

impl MigrationOutcome {
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            success: true,
            log: log.into(),
        }
    }

    pub fn failure(log: impl Into<String>) -> Self {
        Self {
            success: false,
            log: log.into(),
        }
    }

    /// Append a line to the log.
    pub fn push_line(&mut self, line: impl AsRef<str>) {
        if !self.log.is_empty() {
            self.log.push('\n');
        }
        self.log.push_str(line.as_ref());
    }

    /// Mark the outcome failed and append the reason.
    pub fn fail(&mut self, reason: impl AsRef<str>) {
        self.success = false;
        self.push_line(reason);
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        if self.log.is_empty() {
            write!(f, "{status}")
        } else {
            write!(f, "{status}: {}", self.log.replace('\n', "; "))
        }
    }
}
