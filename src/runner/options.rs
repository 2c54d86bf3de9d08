use serde::{Deserialize, Serialize};

use crate::filter::FilterSet;

/// Configuration for a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestExecutionOptions {
    /// Which tests to include and exclude.
    #[serde(rename = "filter", skip_serializing_if = "FilterSet::is_empty")]
    pub filter_set: FilterSet,
    /// Keep only tests that match an inclusion rule, not their descendants.
    pub exact_filter: bool,
    /// Run on the caller's thread instead of a dedicated worker thread.
    pub single_threaded: bool,
    /// Report every selected test as skipped without running it.
    pub skip_test_execution: bool,
}
