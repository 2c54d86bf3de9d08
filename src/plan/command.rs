use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::{Test, TestIndex, TestStatus, TestStep, TestTree};
use crate::runner::context::{TestContext, TestContextManager};

/// Position of a command inside its [`CommandTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandIndex(pub(crate) usize);

impl CommandIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub(crate) struct CommandNode {
    pub(crate) test: TestIndex,
    pub(crate) is_explicit: bool,
    pub(crate) parent: Option<CommandIndex>,
    pub(crate) children: Vec<CommandIndex>,
    pub(crate) dependencies: Vec<CommandIndex>,
    root_step_failures: Arc<AtomicUsize>,
}

impl CommandNode {
    pub(crate) fn new(test: TestIndex, is_explicit: bool, children: Vec<CommandIndex>) -> Self {
        Self {
            test,
            is_explicit,
            parent: None,
            children,
            dependencies: Vec::new(),
            root_step_failures: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// The filtered, dependency-ordered projection of a [`TestTree`].
///
/// Built once per run by a
/// [`TestCommandFactory`](crate::plan::factory::TestCommandFactory). The
/// shape is fixed; only the per-command failure counters change while the
/// tree is executed.
pub struct CommandTree {
    tests: Arc<TestTree>,
    nodes: Vec<CommandNode>,
    by_test: HashMap<TestIndex, CommandIndex>,
    root: CommandIndex,
    context_manager: Arc<dyn TestContextManager>,
}

impl CommandTree {
    pub(crate) fn from_parts(
        tests: Arc<TestTree>,
        nodes: Vec<CommandNode>,
        by_test: HashMap<TestIndex, CommandIndex>,
        root: CommandIndex,
        context_manager: Arc<dyn TestContextManager>,
    ) -> Self {
        Self {
            tests,
            nodes,
            by_test,
            root,
            context_manager,
        }
    }

    pub fn root(&self) -> TestCommand<'_> {
        self.at(self.root)
    }

    pub fn get(&self, index: CommandIndex) -> Option<TestCommand<'_>> {
        (index.0 < self.nodes.len()).then(|| self.at(index))
    }

    /// The command built for `test`, if the test survived filtering.
    pub fn command_for(&self, test: TestIndex) -> Option<TestCommand<'_>> {
        self.by_test.get(&test).map(|&index| self.at(index))
    }

    /// The command for the test with the given id.
    pub fn find(&self, id: &str) -> Option<TestCommand<'_>> {
        self.tests.find(id).and_then(|test| self.command_for(test))
    }

    pub fn test_tree(&self) -> &Arc<TestTree> {
        &self.tests
    }

    pub fn context_manager(&self) -> &Arc<dyn TestContextManager> {
        &self.context_manager
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of command-level dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.nodes.iter().map(|n| n.dependencies.len()).sum()
    }

    fn at(&self, index: CommandIndex) -> TestCommand<'_> {
        TestCommand { tree: self, index }
    }

    fn node(&self, index: CommandIndex) -> &CommandNode {
        &self.nodes[index.0]
    }
}

impl fmt::Debug for CommandTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTree")
            .field("root", &self.root)
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

/// Handle to one command of a [`CommandTree`].
#[derive(Clone, Copy)]
pub struct TestCommand<'a> {
    tree: &'a CommandTree,
    index: CommandIndex,
}

impl<'a> TestCommand<'a> {
    pub fn index(self) -> CommandIndex {
        self.index
    }

    pub fn tree(self) -> &'a CommandTree {
        self.tree
    }

    pub fn test_index(self) -> TestIndex {
        self.node().test
    }

    pub fn test(self) -> &'a Test {
        &self.tree.tests[self.node().test]
    }

    pub fn full_name(self) -> String {
        self.tree.tests.full_name(self.node().test)
    }

    /// Whether this command was selected by an inclusion rule, or is an
    /// ancestor of one that was.
    pub fn is_explicit(self) -> bool {
        self.node().is_explicit
    }

    pub fn parent(self) -> Option<TestCommand<'a>> {
        self.node().parent.map(|p| self.tree.at(p))
    }

    /// Children in execution order.
    pub fn children(self) -> impl ExactSizeIterator<Item = TestCommand<'a>> {
        let tree = self.tree;
        self.node().children.iter().map(move |&c| tree.at(c))
    }

    /// Commands this command depends on. Only dependencies that survived
    /// filtering are present.
    pub fn dependencies(self) -> impl ExactSizeIterator<Item = TestCommand<'a>> {
        let tree = self.tree;
        self.node().dependencies.iter().map(move |&c| tree.at(c))
    }

    /// How many steps started through this command finished as failed.
    pub fn root_step_failure_count(self) -> usize {
        self.node().root_step_failures.load(Ordering::SeqCst)
    }

    /// Size of the pre-order subtree rooted here, this command included.
    pub fn test_count(self) -> usize {
        self.pre_order().count()
    }

    /// Lazy pre-order walk of this subtree. Every dependency is visited
    /// before its dependents.
    pub fn pre_order(self) -> PreOrder<'a> {
        PreOrder {
            tree: self.tree,
            stack: vec![self.index],
        }
    }

    pub fn all_commands(self) -> Vec<TestCommand<'a>> {
        self.pre_order().collect()
    }

    /// True when no dependency, direct or transitive, has a failed step.
    pub fn are_dependencies_satisfied(self) -> bool {
        let mut seen = HashSet::new();
        let mut pending: Vec<CommandIndex> = self.node().dependencies.clone();
        while let Some(index) = pending.pop() {
            if !seen.insert(index) {
                continue;
            }
            let dependency = self.tree.at(index);
            if dependency.root_step_failure_count() != 0 {
                return false;
            }
            pending.extend(dependency.node().dependencies.iter().copied());
        }
        true
    }

    /// Start `step` through the context manager and count it towards
    /// [`root_step_failure_count`](Self::root_step_failure_count) if it fails.
    pub fn start_step(self, step: TestStep) -> Box<dyn TestContext> {
        let mut context = self.tree.context_manager.start_step(step);
        let failures = Arc::clone(&self.node().root_step_failures);
        context.on_finishing(Box::new(move |outcome| {
            if outcome.status() == TestStatus::Failed {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        }));
        context
    }

    /// Start the primary step of this command's test, nested under `parent`.
    pub fn start_primary_child_step(self, parent: Option<&TestStep>) -> Box<dyn TestContext> {
        let step = TestStep::primary(&self.tree.tests, self.node().test, parent);
        self.start_step(step)
    }

    fn node(self) -> &'a CommandNode {
        self.tree.node(self.index)
    }
}

impl PartialEq for TestCommand<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.index == other.index
    }
}

impl Eq for TestCommand<'_> {}

impl fmt::Debug for TestCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCommand")
            .field("index", &self.index)
            .field("test", &self.test().id())
            .field("explicit", &self.is_explicit())
            .finish()
    }
}

/// Pre-order iterator over a command subtree. Clone it to restart.
#[derive(Clone)]
pub struct PreOrder<'a> {
    tree: &'a CommandTree,
    stack: Vec<CommandIndex>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = TestCommand<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        self.stack
            .extend(self.tree.node(index).children.iter().rev().copied());
        Some(self.tree.at(index))
    }
}
