use std::collections::{BTreeMap, HashMap};
use std::ops::Index;

use crate::model::error::TreeError;

/// Position of a [`Test`] inside its [`TestTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestIndex(usize);

impl TestIndex {
    /// The raw arena slot.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node of the declarative test tree: a container (fixture, suite) or a
/// leaf test case.
///
/// A detached test is created with [`Test::new`] and attached with
/// [`TestTree::add_child`]; parent, children and dependencies are owned by
/// the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    id: String,
    name: String,
    order: i32,
    is_test_case: bool,
    metadata: BTreeMap<String, String>,
    parent: Option<TestIndex>,
    children: Vec<TestIndex>,
    dependencies: Vec<TestIndex>,
}

impl Test {
    /// Create a detached test with default order 0.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order: 0,
            is_test_case: false,
            metadata: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_test_case(mut self, is_test_case: bool) -> Self {
        self.is_test_case = is_test_case;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit ordering hint; lower values run first among siblings.
    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_test_case(&self) -> bool {
        self.is_test_case
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn parent(&self) -> Option<TestIndex> {
        self.parent
    }

    pub fn children(&self) -> &[TestIndex] {
        &self.children
    }

    /// Tests this test depends on. These are references, not containment.
    pub fn dependencies(&self) -> &[TestIndex] {
        &self.dependencies
    }

    fn validate(&self) -> Result<(), TreeError> {
        if self.id.is_empty() {
            return Err(TreeError::EmptyId {
                name: self.name.clone(),
            });
        }
        if self.name.is_empty() {
            return Err(TreeError::EmptyName {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Arena holding an immutable-shape tree of tests.
///
/// Slot 0 is always the root. Ids are unique across the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestTree {
    tests: Vec<Test>,
    ids: HashMap<String, TestIndex>,
}

impl TestTree {
    /// Create a tree rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError`] if the root has an empty id or name.
    pub fn new(root: Test) -> Result<Self, TreeError> {
        root.validate()?;
        let mut tree = Self {
            tests: Vec::new(),
            ids: HashMap::new(),
        };
        tree.insert(detach(root));
        Ok(tree)
    }

    pub fn root(&self) -> TestIndex {
        TestIndex(0)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn get(&self, index: TestIndex) -> Option<&Test> {
        self.tests.get(index.0)
    }

    /// Look a test up by id.
    pub fn find(&self, id: &str) -> Option<TestIndex> {
        self.ids.get(id).copied()
    }

    /// Attach a detached test as the last child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError`] if the test has an empty id or name, or if its
    /// id is already used in this tree.
    pub fn add_child(&mut self, parent: TestIndex, test: Test) -> Result<TestIndex, TreeError> {
        test.validate()?;
        if self.ids.contains_key(&test.id) {
            return Err(TreeError::DuplicateId { id: test.id });
        }
        let mut test = detach(test);
        test.parent = Some(parent);
        let index = self.insert(test);
        self.tests[parent.0].children.push(index);
        Ok(index)
    }

    /// Record that `test` depends on `on`. Duplicate edges are ignored.
    ///
    /// No structural validation happens here; invalid edges (self, ancestor,
    /// descendant, cycles) are rejected when the command tree is built.
    pub fn add_dependency(&mut self, test: TestIndex, on: TestIndex) {
        let dependencies = &mut self.tests[test.0].dependencies;
        if !dependencies.contains(&on) {
            dependencies.push(on);
        }
    }

    /// Slash-separated path of names below the root. The root is named by
    /// its own name.
    pub fn full_name(&self, index: TestIndex) -> String {
        let test = &self[index];
        match test.parent {
            None => test.name.clone(),
            Some(parent) if self[parent].parent.is_none() => test.name.clone(),
            Some(parent) => format!("{}/{}", self.full_name(parent), test.name),
        }
    }

    /// The test itself followed by each ancestor up to the root.
    pub fn ancestors(&self, index: TestIndex) -> impl Iterator<Item = TestIndex> + '_ {
        std::iter::successors(Some(index), |&i| self[i].parent)
    }

    /// Every test in pre-order, children in declaration order.
    pub fn pre_order(&self) -> Vec<TestIndex> {
        let mut out = Vec::with_capacity(self.tests.len());
        let mut stack = vec![self.root()];
        while let Some(index) = stack.pop() {
            out.push(index);
            stack.extend(self[index].children.iter().rev());
        }
        out
    }

    /// Total number of dependency edges declared in the tree.
    pub fn dependency_count(&self) -> usize {
        self.tests.iter().map(|t| t.dependencies.len()).sum()
    }

    fn insert(&mut self, test: Test) -> TestIndex {
        let index = TestIndex(self.tests.len());
        self.ids.insert(test.id.clone(), index);
        self.tests.push(test);
        index
    }
}

impl Index<TestIndex> for TestTree {
    type Output = Test;

    fn index(&self, index: TestIndex) -> &Test {
        &self.tests[index.0]
    }
}

fn detach(mut test: Test) -> Test {
    test.parent = None;
    test.children.clear();
    test.dependencies.clear();
    test
}
