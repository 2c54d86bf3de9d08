use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse status of a step. Variants are declared in ascending severity so
/// the derived ordering is the combination order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Skipped,
    Inconclusive,
    Failed,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Skipped => "skipped",
            Self::Inconclusive => "inconclusive",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a step: a status refined by an optional category
/// (`error`, `canceled`, `ignored`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestOutcome {
    status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<Cow<'static, str>>,
}

impl TestOutcome {
    pub const PASSED: Self = Self::new(TestStatus::Passed);
    pub const FAILED: Self = Self::new(TestStatus::Failed);
    pub const ERROR: Self = Self::named(TestStatus::Failed, "error");
    pub const TIMEOUT: Self = Self::named(TestStatus::Failed, "timeout");
    pub const INCONCLUSIVE: Self = Self::new(TestStatus::Inconclusive);
    pub const CANCELED: Self = Self::named(TestStatus::Inconclusive, "canceled");
    pub const SKIPPED: Self = Self::new(TestStatus::Skipped);
    pub const IGNORED: Self = Self::named(TestStatus::Skipped, "ignored");
    pub const PENDING: Self = Self::named(TestStatus::Skipped, "pending");
    pub const EXPLICIT: Self = Self::named(TestStatus::Skipped, "explicit");

    pub const fn new(status: TestStatus) -> Self {
        Self {
            status,
            category: None,
        }
    }

    const fn named(status: TestStatus, category: &'static str) -> Self {
        Self {
            status,
            category: Some(Cow::Borrowed(category)),
        }
    }

    /// An outcome with a custom category. An empty category is dropped.
    pub fn with_category(status: TestStatus, category: impl Into<String>) -> Self {
        let category: String = category.into();
        Self {
            status,
            category: (!category.is_empty()).then_some(Cow::Owned(category)),
        }
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// The category when present, otherwise the status name.
    pub fn display_name(&self) -> &str {
        self.category().unwrap_or(self.status.as_str())
    }

    /// Merge two outcomes of sibling or sequential work.
    ///
    /// The more severe status wins. On equal status a categorized outcome
    /// beats an uncategorized one; otherwise the left operand is kept.
    pub fn combine_with(&self, other: &TestOutcome) -> TestOutcome {
        let other_wins = other.status > self.status
            || (other.status == self.status && self.category.is_none() && other.category.is_some());
        if other_wins {
            other.clone()
        } else {
            self.clone()
        }
    }

    /// Collapse to the bare status, dropping the category.
    pub fn generalize(&self) -> TestOutcome {
        Self::new(self.status)
    }
}

impl Default for TestOutcome {
    fn default() -> Self {
        Self::PASSED
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Error returned when text does not name an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown test outcome '{0}'")]
pub struct OutcomeParseError(pub String);

impl FromStr for TestOutcome {
    type Err = OutcomeParseError;

    /// Accepts the named outcomes (`passed`, `error`, `canceled`, ...) or
    /// `status:category`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        let outcome = match text.as_str() {
            "passed" => Self::PASSED,
            "failed" => Self::FAILED,
            "error" => Self::ERROR,
            "timeout" => Self::TIMEOUT,
            "inconclusive" => Self::INCONCLUSIVE,
            "canceled" | "cancelled" => Self::CANCELED,
            "skipped" => Self::SKIPPED,
            "ignored" => Self::IGNORED,
            "pending" => Self::PENDING,
            "explicit" => Self::EXPLICIT,
            other => {
                let (status, category) = other
                    .split_once(':')
                    .ok_or_else(|| OutcomeParseError(s.to_owned()))?;
                let status = match status.trim() {
                    "passed" => TestStatus::Passed,
                    "skipped" => TestStatus::Skipped,
                    "inconclusive" => TestStatus::Inconclusive,
                    "failed" => TestStatus::Failed,
                    _ => return Err(OutcomeParseError(s.to_owned())),
                };
                Self::with_category(status, category.trim())
            }
        };
        Ok(outcome)
    }
}
