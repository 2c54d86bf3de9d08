use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::filter::{FilterSetResult, TestFilterEvaluator};
use crate::model::{ModelError, TestIndex, TestTree};
use crate::plan::command::{CommandIndex, CommandNode, CommandTree};
use crate::plan::order::{DefaultTestOrderStrategy, TestOrderStrategy};
use crate::runner::context::TestContextManager;

/// Builds command trees from test trees.
pub trait TestCommandFactory {
    /// Build the command tree for the tests selected by `filter`.
    ///
    /// With `exact_filter` only tests that match an inclusion rule, and their
    /// ancestors, are kept; otherwise descendants of a match are kept too.
    /// Returns `Ok(None)` when nothing is selected.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] for dependencies on self, on an ancestor or on a
    /// descendant, and for dependency cycles.
    fn build_commands(
        &self,
        tests: Arc<TestTree>,
        filter: &dyn TestFilterEvaluator,
        exact_filter: bool,
        context_manager: Arc<dyn TestContextManager>,
    ) -> Result<Option<CommandTree>, ModelError>;
}

/// Orders siblings topologically by dependency, breaking ties with a
/// [`TestOrderStrategy`].
pub struct DefaultTestCommandFactory {
    order: Box<dyn TestOrderStrategy>,
}

impl DefaultTestCommandFactory {
    pub fn new() -> Self {
        Self {
            order: Box::new(DefaultTestOrderStrategy),
        }
    }

    pub fn with_order_strategy(order: impl TestOrderStrategy + 'static) -> Self {
        Self {
            order: Box::new(order),
        }
    }

    fn sort_by_order(&self, tests: &TestTree, nodes: &[CommandNode], commands: &mut [CommandIndex]) {
        commands.sort_by(|a, b| {
            self.order
                .compare(&tests[nodes[a.0].test], &tests[nodes[b.0].test])
        });
    }

    /// Reorder the children of `parent`, then recurse into each child.
    ///
    /// Children are pre-sorted by the order strategy and then emitted by a
    /// stack-based depth-first walk of the sibling dependency edges, so
    /// independent siblings keep their pre-sorted relative order.
    fn sort_children(
        &self,
        tests: &TestTree,
        nodes: &mut [CommandNode],
        siblings: &DiGraphMap<CommandIndex, ()>,
        parent: CommandIndex,
    ) -> Result<(), ModelError> {
        let mut children = std::mem::take(&mut nodes[parent.0].children);
        if children.is_empty() {
            return Ok(());
        }
        self.sort_by_order(tests, nodes, &mut children);

        let mut visited: HashMap<CommandIndex, Visit> = HashMap::new();
        let mut ordered = Vec::with_capacity(children.len());
        let mut stack = vec![DepthFirstEntry {
            source: None,
            pending: children.clone().into_iter(),
        }];

        while let Some(top) = stack.last_mut() {
            if let Some(current) = top.pending.next() {
                match visited.get(&current) {
                    Some(Visit::InProgress) => {
                        return Err(cycle_error(tests, nodes, siblings, current));
                    }
                    Some(Visit::Done) => {}
                    None => {
                        let mut dependencies: Vec<CommandIndex> =
                            siblings.neighbors(current).collect();
                        if dependencies.is_empty() {
                            ordered.push(current);
                            visited.insert(current, Visit::Done);
                        } else {
                            visited.insert(current, Visit::InProgress);
                            self.sort_by_order(tests, nodes, &mut dependencies);
                            stack.push(DepthFirstEntry {
                                source: Some(current),
                                pending: dependencies.into_iter(),
                            });
                        }
                    }
                }
            } else if let Some(DepthFirstEntry {
                source: Some(source),
                ..
            }) = stack.pop()
            {
                ordered.push(source);
                visited.insert(source, Visit::Done);
            } else {
                break;
            }
        }

        nodes[parent.0].children = ordered;
        for child in children {
            self.sort_children(tests, nodes, siblings, child)?;
        }
        Ok(())
    }
}

impl Default for DefaultTestCommandFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCommandFactory for DefaultTestCommandFactory {
    #[tracing::instrument(skip_all, fields(tests = tests.len(), exact_filter = exact_filter))]
    fn build_commands(
        &self,
        tests: Arc<TestTree>,
        filter: &dyn TestFilterEvaluator,
        exact_filter: bool,
        context_manager: Arc<dyn TestContextManager>,
    ) -> Result<Option<CommandTree>, ModelError> {
        let mut nodes = Vec::new();
        let closure = FilteredClosure {
            tests: &tests,
            filter,
            exact_filter,
        };
        let has_explicit_ancestor = !filter.has_inclusion_rules();
        let Some(root) = closure.visit(tests.root(), has_explicit_ancestor, &mut nodes) else {
            debug!("filter selected no tests");
            return Ok(None);
        };

        let by_test: HashMap<TestIndex, CommandIndex> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.test, CommandIndex(i)))
            .collect();
        let siblings = populate_dependencies(&tests, &mut nodes, &by_test)?;
        self.sort_children(&tests, &mut nodes, &siblings, root)?;

        debug!(
            commands = nodes.len(),
            sibling_edges = siblings.edge_count(),
            "built command tree"
        );
        Ok(Some(CommandTree::from_parts(
            tests,
            nodes,
            by_test,
            root,
            context_manager,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

struct DepthFirstEntry {
    source: Option<CommandIndex>,
    pending: std::vec::IntoIter<CommandIndex>,
}

struct FilteredClosure<'a> {
    tests: &'a TestTree,
    filter: &'a dyn TestFilterEvaluator,
    exact_filter: bool,
}

impl FilteredClosure<'_> {
    /// Create commands for the selected part of the subtree at `test`.
    /// Commands are pushed children first.
    fn visit(
        &self,
        test: TestIndex,
        has_explicit_ancestor: bool,
        nodes: &mut Vec<CommandNode>,
    ) -> Option<CommandIndex> {
        let result = self.filter.evaluate(self.tests, test);
        if result == FilterSetResult::Exclude {
            return None;
        }
        let is_match = result == FilterSetResult::Include;
        let is_explicit = is_match && !has_explicit_ancestor;

        let mut children = Vec::with_capacity(self.tests[test].children().len());
        let mut has_explicit_child = false;
        for &child in self.tests[test].children() {
            if let Some(command) = self.visit(child, has_explicit_ancestor || is_explicit, nodes) {
                has_explicit_child |= nodes[command.0].is_explicit;
                children.push(command);
            }
        }

        if !(is_match || !children.is_empty() || (!self.exact_filter && has_explicit_ancestor)) {
            return None;
        }
        let index = CommandIndex(nodes.len());
        for child in &children {
            nodes[child.0].parent = Some(index);
        }
        nodes.push(CommandNode::new(test, is_explicit || has_explicit_child, children));
        Some(index)
    }
}

/// Record command-level dependencies and return the sibling-level edges that
/// enforce them, one containment level at a time.
fn populate_dependencies(
    tests: &TestTree,
    nodes: &mut [CommandNode],
    by_test: &HashMap<TestIndex, CommandIndex>,
) -> Result<DiGraphMap<CommandIndex, ()>, ModelError> {
    let mut siblings = DiGraphMap::new();
    for source in 0..nodes.len() {
        let source_test = nodes[source].test;
        for &target_test in tests[source_test].dependencies() {
            let Some(&target) = by_test.get(&target_test) else {
                continue;
            };
            nodes[source].dependencies.push(target);

            let (from, to) = sibling_edge(tests, source_test, target_test)?;
            if let (Some(&from), Some(&to)) = (by_test.get(&from), by_test.get(&to)) {
                siblings.add_edge(from, to, ());
            }
        }
    }
    Ok(siblings)
}

/// Walk both ancestor paths down from the root and return the first pair of
/// tests where they diverge. Those two are siblings, and the first must run
/// after the second.
fn sibling_edge(
    tests: &TestTree,
    source: TestIndex,
    target: TestIndex,
) -> Result<(TestIndex, TestIndex), ModelError> {
    if source == target {
        return Err(ModelError::SelfDependency {
            test: tests.full_name(source),
        });
    }
    let mut source_path: Vec<TestIndex> = tests.ancestors(source).collect();
    let mut target_path: Vec<TestIndex> = tests.ancestors(target).collect();
    loop {
        let Some(source_ancestor) = source_path.pop() else {
            return Err(ModelError::DescendantDependency {
                test: tests.full_name(source),
                descendant: tests.full_name(target),
            });
        };
        let Some(target_ancestor) = target_path.pop() else {
            return Err(ModelError::AncestorDependency {
                test: tests.full_name(source),
                ancestor: tests.full_name(target),
            });
        };
        if source_ancestor != target_ancestor {
            return Ok((source_ancestor, target_ancestor));
        }
    }
}

fn cycle_error(
    tests: &TestTree,
    nodes: &[CommandNode],
    siblings: &DiGraphMap<CommandIndex, ()>,
    current: CommandIndex,
) -> ModelError {
    let name = |index: CommandIndex| tests.full_name(nodes[index.0].test);
    let mut participants: Vec<String> = tarjan_scc(siblings)
        .into_iter()
        .find(|component| component.contains(&current))
        .unwrap_or_else(|| vec![current])
        .into_iter()
        .map(name)
        .collect();
    participants.sort();
    ModelError::DependencyCycle {
        test: name(current),
        participants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    use crate::filter::{Filter, FilterRule, FilterSet};
    use crate::model::test_trees::{case, depend, fixture_tree, sample_tree};
    use crate::model::{Test, TestOutcome};
    use crate::plan::command::TestCommand;
    use crate::runner::context::ObservableTestContextManager;

    fn build_with(
        tree: TestTree,
        filter: &FilterSet,
        exact: bool,
    ) -> Result<Option<CommandTree>, ModelError> {
        DefaultTestCommandFactory::default().build_commands(
            Arc::new(tree),
            filter,
            exact,
            Arc::new(ObservableTestContextManager::default()),
        )
    }

    fn build(tree: TestTree) -> CommandTree {
        build_with(tree, &FilterSet::empty(), false)
            .expect("valid tree")
            .expect("something selected")
    }

    fn names(commands: &CommandTree) -> Vec<String> {
        commands
            .root()
            .pre_order()
            .map(|c| c.test().name().to_owned())
            .collect()
    }

    fn name_filter(name: &str) -> FilterSet {
        FilterSet::including(Filter::Name(name.into()))
    }

    fn command<'a>(commands: &'a CommandTree, name: &str) -> TestCommand<'a> {
        commands
            .root()
            .pre_order()
            .find(|c| c.test().name() == name)
            .unwrap_or_else(|| panic!("no command named '{name}'"))
    }

    fn position(commands: &CommandTree, name: &str) -> usize {
        names(commands)
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("no command named '{name}'"))
    }

    /// Root with siblings S1..Sn declared in order, each a test case.
    fn flat_tree(count: usize) -> TestTree {
        let mut tree = TestTree::new(Test::new("root", "Root")).unwrap();
        for i in 1..=count {
            tree.add_child(tree.root(), case(&format!("S{i}"), 0))
                .unwrap();
        }
        tree
    }

    // ── filtered closure ───────────────────────────────────

    #[test]
    fn empty_filter_keeps_whole_tree_in_declaration_order() {
        let commands = build(sample_tree());
        assert_eq!(
            names(&commands),
            vec!["Root", "A", "A1", "A2", "A3", "B", "B1"]
        );
        assert!(commands.root().pre_order().all(|c| !c.is_explicit()));
    }

    #[test]
    fn no_match_yields_no_tree() {
        let result = build_with(sample_tree(), &name_filter("Nope"), false).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn excluded_root_yields_no_tree() {
        let filter = FilterSet::new(vec![FilterRule::exclude(Filter::Any)]);
        assert!(build_with(sample_tree(), &filter, false).unwrap().is_none());
    }

    #[test]
    fn matching_container_pulls_in_descendants() {
        let commands = build_with(sample_tree(), &name_filter("A"), false)
            .unwrap()
            .unwrap();
        assert_eq!(names(&commands), vec!["Root", "A", "A1", "A2", "A3"]);
        assert!(command(&commands, "A").is_explicit());
        assert!(!command(&commands, "A1").is_explicit());
        assert!(commands.root().is_explicit());
    }

    #[test]
    fn exact_filter_keeps_only_matches_and_ancestors() {
        let commands = build_with(sample_tree(), &name_filter("A"), true)
            .unwrap()
            .unwrap();
        assert_eq!(names(&commands), vec!["Root", "A"]);
    }

    #[test]
    fn exclusion_prunes_subtree() {
        let filter = FilterSet::new(vec![FilterRule::exclude(Filter::Name("A".into()))]);
        let commands = build_with(sample_tree(), &filter, false).unwrap().unwrap();
        assert_eq!(names(&commands), vec!["Root", "B", "B1"]);
    }

    #[test]
    fn match_under_explicit_ancestor_is_not_explicit() {
        let filter = FilterSet::including(Filter::Or(vec![
            Filter::Name("A".into()),
            Filter::Name("A2".into()),
        ]));
        let commands = build_with(sample_tree(), &filter, false).unwrap().unwrap();
        assert!(command(&commands, "A").is_explicit());
        assert!(!command(&commands, "A2").is_explicit());
    }

    #[test]
    fn explicit_leaf_marks_ancestors_explicit() {
        let commands = build_with(fixture_tree(), &name_filter("T2"), true)
            .unwrap()
            .unwrap();
        assert_eq!(names(&commands), vec!["Root", "Fixture", "T2"]);
        assert!(command(&commands, "T2").is_explicit());
        assert!(command(&commands, "Fixture").is_explicit());
        assert!(commands.root().is_explicit());
    }

    // ── ordering ───────────────────────────────────────────

    #[test]
    fn siblings_sorted_by_order_then_name() {
        let mut tree = TestTree::new(Test::new("root", "Root")).unwrap();
        for (name, order) in [("b", 5), ("a", 5), ("c", 1)] {
            tree.add_child(tree.root(), case(name, order)).unwrap();
        }
        assert_eq!(names(&build(tree)), vec!["Root", "c", "a", "b"]);
    }

    #[test]
    fn custom_order_strategy_is_used() {
        let factory = DefaultTestCommandFactory::with_order_strategy(|a: &Test, b: &Test| {
            b.name().cmp(a.name())
        });
        let commands = factory
            .build_commands(
                Arc::new(flat_tree(3)),
                &FilterSet::empty(),
                false,
                Arc::new(ObservableTestContextManager::default()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(names(&commands), vec!["Root", "S3", "S2", "S1"]);
    }

    #[test]
    fn dependency_free_tree_keeps_test_tree_pre_order() {
        let tree = sample_tree();
        let expected: Vec<String> = tree
            .pre_order()
            .iter()
            .map(|&i| tree[i].name().to_owned())
            .collect();
        assert_eq!(names(&build(tree)), expected);
    }

    #[test]
    fn dependency_chain_among_siblings_is_respected() {
        let mut tree = flat_tree(5);
        depend(&mut tree, "S1", "S2");
        depend(&mut tree, "S2", "S3");
        depend(&mut tree, "S3", "S4");
        let commands = build(tree);
        assert_eq!(
            names(&commands),
            vec!["Root", "S4", "S3", "S2", "S1", "S5"]
        );
    }

    #[test]
    fn dependency_precedes_dependent_for_every_edge() {
        let mut tree = flat_tree(6);
        let edges = [("S2", "S5"), ("S5", "S6"), ("S1", "S6"), ("S3", "S1")];
        for (from, to) in edges {
            depend(&mut tree, from, to);
        }
        let commands = build(tree);
        for (from, to) in edges {
            assert!(
                position(&commands, to) < position(&commands, from),
                "{to} should precede {from}"
            );
        }
    }

    #[test]
    fn unrelated_siblings_keep_order_around_dependencies() {
        let mut tree = flat_tree(4);
        depend(&mut tree, "S1", "S3");
        let commands = build(tree);
        assert_eq!(names(&commands), vec!["Root", "S3", "S1", "S2", "S4"]);
    }

    #[test]
    fn dependencies_of_a_node_are_emitted_in_strategy_order() {
        let mut tree = flat_tree(4);
        depend(&mut tree, "S1", "S4");
        depend(&mut tree, "S1", "S3");
        let commands = build(tree);
        assert_eq!(names(&commands), vec!["Root", "S3", "S4", "S1", "S2"]);
    }

    #[test]
    fn cross_branch_dependency_orders_common_ancestor_children() {
        let mut tree = sample_tree();
        depend(&mut tree, "A2", "B1");
        let commands = build(tree);
        assert_eq!(
            names(&commands),
            vec!["Root", "B", "B1", "A", "A1", "A2", "A3"]
        );
        let a2 = command(&commands, "A2");
        let deps: Vec<_> = a2.dependencies().map(|c| c.test().name()).collect();
        assert_eq!(deps, vec!["B1"]);
    }

    #[test]
    fn dependency_on_filtered_out_test_is_dropped() {
        let mut tree = sample_tree();
        depend(&mut tree, "A2", "B1");
        let commands = build_with(tree, &name_filter("A"), false).unwrap().unwrap();
        assert_eq!(command(&commands, "A2").dependencies().len(), 0);
        assert_eq!(commands.dependency_count(), 0);
    }

    #[test]
    fn fixture_scenario_orders_and_tracks_failure() {
        let mut tree = fixture_tree();
        depend(&mut tree, "T2", "T1");
        let commands = build_with(tree, &name_filter("Fixture"), false)
            .unwrap()
            .unwrap();
        assert_eq!(names(&commands), vec!["Root", "Fixture", "T1", "T2"]);

        let t2 = command(&commands, "T2");
        assert!(t2.are_dependencies_satisfied());
        command(&commands, "T1")
            .start_primary_child_step(None)
            .finish_step(TestOutcome::FAILED, None);
        assert!(!t2.are_dependencies_satisfied());
    }

    #[test]
    fn reverse_declaration_order_is_sorted_by_dependency() {
        let mut tree = fixture_tree();
        depend(&mut tree, "T1", "T2");
        assert_eq!(
            names(&build(tree)),
            vec!["Root", "Fixture", "T2", "T1"]
        );
    }

    // ── validation ─────────────────────────────────────────

    #[test]
    fn self_dependency_is_rejected() {
        let mut tree = sample_tree();
        depend(&mut tree, "A1", "A1");
        let err = build_with(tree, &FilterSet::empty(), false).unwrap_err();
        assert_eq!(
            err,
            ModelError::SelfDependency {
                test: "A/A1".into()
            }
        );
    }

    #[test]
    fn dependency_on_child_is_rejected() {
        let mut tree = sample_tree();
        depend(&mut tree, "A", "A3");
        let err = build_with(tree, &FilterSet::empty(), false).unwrap_err();
        assert_eq!(
            err,
            ModelError::DescendantDependency {
                test: "A".into(),
                descendant: "A/A3".into(),
            }
        );
        assert_eq!(err.tests(), vec!["A", "A/A3"]);
    }

    #[test]
    fn dependency_on_parent_is_rejected() {
        let mut tree = sample_tree();
        depend(&mut tree, "B1", "B");
        let err = build_with(tree, &FilterSet::empty(), false).unwrap_err();
        assert_eq!(
            err,
            ModelError::AncestorDependency {
                test: "B/B1".into(),
                ancestor: "B".into(),
            }
        );
    }

    #[test]
    fn dependency_on_root_is_rejected() {
        let mut tree = sample_tree();
        depend(&mut tree, "A1", "Root");
        assert!(matches!(
            build_with(tree, &FilterSet::empty(), false),
            Err(ModelError::AncestorDependency { .. })
        ));
    }

    #[test]
    fn three_sibling_cycle_is_rejected() {
        let mut tree = sample_tree();
        depend(&mut tree, "A1", "A2");
        depend(&mut tree, "A2", "A3");
        depend(&mut tree, "A3", "A1");
        let err = build_with(tree, &FilterSet::empty(), false).unwrap_err();
        let ModelError::DependencyCycle { test, participants } = &err else {
            panic!("expected a cycle error, got {err}");
        };
        assert!(["A/A1", "A/A2", "A/A3"].contains(&test.as_str()));
        assert_eq!(participants, &vec!["A/A1", "A/A2", "A/A3"]);
    }

    #[test]
    fn cycle_through_descendants_is_rejected_at_ancestor_level() {
        let mut tree = sample_tree();
        depend(&mut tree, "A1", "B1");
        depend(&mut tree, "B1", "A2");
        let err = build_with(tree, &FilterSet::empty(), false).unwrap_err();
        let ModelError::DependencyCycle { participants, .. } = err else {
            panic!("expected a cycle error");
        };
        assert_eq!(participants, vec!["A", "B"]);
    }

    #[test]
    fn invalid_dependency_outside_selection_is_ignored() {
        let mut tree = sample_tree();
        depend(&mut tree, "B1", "B");
        let commands = build_with(tree, &name_filter("A"), false).unwrap();
        assert!(commands.is_some());
    }

    #[test]
    fn comparator_sees_test_values() {
        let seen_orders = |a: &Test, b: &Test| -> Ordering { a.order().cmp(&b.order()) };
        let mut tree = flat_tree(2);
        tree.add_child(tree.root(), case("S0", -3)).unwrap();
        let commands = DefaultTestCommandFactory::with_order_strategy(seen_orders)
            .build_commands(
                Arc::new(tree),
                &FilterSet::empty(),
                false,
                Arc::new(ObservableTestContextManager::default()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(names(&commands)[1], "S0");
    }
}
