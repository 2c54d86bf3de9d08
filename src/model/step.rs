use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::outcome::TestOutcome;
use crate::model::tree::{TestIndex, TestTree};

static NEXT_STEP_ID: AtomicU64 = AtomicU64::new(1);

fn next_step_id() -> String {
    format!("step-{}", NEXT_STEP_ID.fetch_add(1, Ordering::Relaxed))
}

/// One concrete execution instance of a test.
///
/// A primary step stands for the test itself; nested (non-primary) steps
/// are created by controllers that split a test into several runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStep {
    id: String,
    name: String,
    full_name: String,
    test: TestIndex,
    test_id: String,
    parent_id: Option<String>,
    is_primary: bool,
    is_test_case: bool,
}

impl TestStep {
    /// The primary step of `test`, nested under `parent` when given.
    pub fn primary(tree: &TestTree, test: TestIndex, parent: Option<&TestStep>) -> Self {
        let t = &tree[test];
        Self::build(test, t.id(), t.name(), t.is_test_case(), parent, true)
    }

    /// A nested, non-primary step of the same test as `parent`.
    pub fn child(parent: &TestStep, name: impl Into<String>, is_test_case: bool) -> Self {
        let name = name.into();
        Self::build(
            parent.test,
            &parent.test_id,
            &name,
            is_test_case,
            Some(parent),
            false,
        )
    }

    fn build(
        test: TestIndex,
        test_id: &str,
        name: &str,
        is_test_case: bool,
        parent: Option<&TestStep>,
        is_primary: bool,
    ) -> Self {
        let full_name = match parent {
            Some(p) => format!("{}/{name}", p.full_name),
            None => name.to_owned(),
        };
        Self {
            id: next_step_id(),
            name: name.to_owned(),
            full_name,
            test,
            test_id: test_id.to_owned(),
            parent_id: parent.map(|p| p.id.clone()),
            is_primary,
            is_test_case,
        }
    }

    /// Process-unique step id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn test(&self) -> TestIndex {
        self.test
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn is_test_case(&self) -> bool {
        self.is_test_case
    }
}

/// What a finished step reports back to whoever started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub outcome: TestOutcome,
    pub duration: Duration,
    pub assert_count: u32,
}

impl TestResult {
    pub fn new(outcome: TestOutcome) -> Self {
        Self {
            outcome,
            duration: Duration::ZERO,
            assert_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_trees::{sample_tree, test_named};

    #[test]
    fn primary_step_copies_test_identity() {
        let tree = sample_tree();
        let a1 = test_named(&tree, "A1");
        let step = TestStep::primary(&tree, a1, None);
        assert_eq!(step.name(), "A1");
        assert_eq!(step.test(), a1);
        assert_eq!(step.test_id(), "a1");
        assert!(step.is_primary());
        assert!(step.is_test_case());
        assert!(step.parent_id().is_none());
    }

    #[test]
    fn nested_steps_chain_full_names_and_parents() {
        let tree = sample_tree();
        let root = TestStep::primary(&tree, tree.root(), None);
        let a = TestStep::primary(&tree, test_named(&tree, "A"), Some(&root));
        let data_row = TestStep::child(&a, "row 1", true);
        assert_eq!(a.full_name(), "Root/A");
        assert_eq!(a.parent_id(), Some(root.id()));
        assert_eq!(data_row.full_name(), "Root/A/row 1");
        assert_eq!(data_row.test_id(), "a");
        assert!(!data_row.is_primary());
    }

    #[test]
    fn step_ids_are_unique() {
        let tree = sample_tree();
        let first = TestStep::primary(&tree, tree.root(), None);
        let second = TestStep::primary(&tree, tree.root(), None);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn new_result_has_zero_duration() {
        let result = TestResult::new(TestOutcome::SKIPPED);
        assert_eq!(result.outcome, TestOutcome::SKIPPED);
        assert_eq!(result.duration, Duration::ZERO);
        assert_eq!(result.assert_count, 0);
    }
}
