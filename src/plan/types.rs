use serde::{Deserialize, Serialize};

use crate::filter::FilterSet;
use crate::plan::command::CommandTree;

/// A command tree flattened into execution order, ready for output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandPlan {
    pub plan: PlanMetadata,
    pub commands: Vec<PlanEntry>,
}

/// Metadata about the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
    pub exact_filter: bool,
    pub commands_total: usize,
    pub dependencies_total: usize,
}

/// One command, in pre-order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanEntry {
    pub order: usize,
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub depth: usize,
    pub explicit: bool,
    pub test_case: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl CommandPlan {
    /// Flatten `commands` in pre-order. Dependencies are listed by test id.
    pub fn from_tree(commands: &CommandTree, filter: &FilterSet, exact_filter: bool) -> Self {
        let root = commands.root();
        let entries = root
            .pre_order()
            .enumerate()
            .map(|(i, command)| {
                let test = command.test();
                PlanEntry {
                    order: i + 1,
                    id: test.id().to_owned(),
                    name: test.name().to_owned(),
                    full_name: command.full_name(),
                    depth: std::iter::successors(command.parent(), |c| c.parent()).count(),
                    explicit: command.is_explicit(),
                    test_case: test.is_test_case(),
                    depends_on: command
                        .dependencies()
                        .map(|d| d.test().id().to_owned())
                        .collect(),
                }
            })
            .collect();

        Self {
            plan: PlanMetadata {
                name: root.test().name().to_owned(),
                filter: filter.to_string(),
                exact_filter,
                commands_total: commands.len(),
                dependencies_total: commands.dependency_count(),
            },
            commands: entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::filter::Filter;
    use crate::model::test_trees::{depend, fixture_tree};
    use crate::plan::factory::{DefaultTestCommandFactory, TestCommandFactory};
    use crate::runner::context::ObservableTestContextManager;

    fn plan_for(filter: FilterSet, exact: bool) -> CommandPlan {
        let mut tree = fixture_tree();
        depend(&mut tree, "T2", "T1");
        let commands = DefaultTestCommandFactory::default()
            .build_commands(
                Arc::new(tree),
                &filter,
                exact,
                Arc::new(ObservableTestContextManager::default()),
            )
            .unwrap()
            .unwrap();
        CommandPlan::from_tree(&commands, &filter, exact)
    }

    #[test]
    fn entries_follow_pre_order_with_depth() {
        let plan = plan_for(FilterSet::empty(), false);
        let rows: Vec<(usize, &str, usize)> = plan
            .commands
            .iter()
            .map(|e| (e.order, e.name.as_str(), e.depth))
            .collect();
        assert_eq!(
            rows,
            vec![(1, "Root", 0), (2, "Fixture", 1), (3, "T1", 2), (4, "T2", 2)]
        );
        assert_eq!(plan.commands[3].depends_on, vec!["t1"]);
        assert_eq!(plan.commands[3].full_name, "Fixture/T2");
    }

    #[test]
    fn metadata_counts_and_filter_text() {
        let plan = plan_for(FilterSet::including(Filter::Name("T2".into())), true);
        assert_eq!(plan.plan.name, "Root");
        assert_eq!(plan.plan.filter, "include name:T2");
        assert!(plan.plan.exact_filter);
        assert_eq!(plan.plan.commands_total, 3);
        assert_eq!(plan.plan.dependencies_total, 0);
        assert!(plan.commands.iter().all(|e| e.name != "T1"));
    }
}
