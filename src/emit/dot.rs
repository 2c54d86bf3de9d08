use std::fmt::Write as _;

use crate::plan::CommandTree;

/// Emit a command tree as a DOT (Graphviz) diagram.
///
/// Containment edges are solid, dependency edges dashed. Explicitly
/// selected commands are drawn bold.
pub fn emit_dot(commands: &CommandTree) -> String {
    let root = commands.root();
    let mut out = format!("digraph \"{}\" {{\n", escape(root.test().name()));

    for command in root.pre_order() {
        let test = command.test();
        let style = if command.is_explicit() { ", style=bold" } else { "" };
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\"{style}];",
            escape(test.id()),
            escape(test.name())
        );
    }

    for command in root.pre_order() {
        let id = escape(command.test().id());
        for child in command.children() {
            let _ = writeln!(out, "  \"{id}\" -> \"{}\";", escape(child.test().id()));
        }
        for dependency in command.dependencies() {
            let _ = writeln!(
                out,
                "  \"{id}\" -> \"{}\" [style=dashed, label=\"depends on\"];",
                escape(dependency.test().id())
            );
        }
    }

    out.push_str("}\n");
    out
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::filter::{Filter, FilterSet};
    use crate::model::test_trees::{depend, fixture_tree};
    use crate::plan::{DefaultTestCommandFactory, TestCommandFactory};
    use crate::runner::context::ObservableTestContextManager;

    fn commands(filter: FilterSet) -> CommandTree {
        let mut tree = fixture_tree();
        depend(&mut tree, "T2", "T1");
        DefaultTestCommandFactory::default()
            .build_commands(
                Arc::new(tree),
                &filter,
                false,
                Arc::new(ObservableTestContextManager::default()),
            )
            .unwrap()
            .unwrap()
    }

    #[test]
    fn dot_declares_every_command() {
        let dot = emit_dot(&commands(FilterSet::empty()));
        assert!(dot.starts_with("digraph \"Root\" {\n"));
        assert!(dot.contains("\"t1\" [label=\"T1\"];"));
        assert!(dot.contains("\"fixture\" [label=\"Fixture\"];"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn dot_draws_containment_and_dependencies() {
        let dot = emit_dot(&commands(FilterSet::empty()));
        assert!(dot.contains("\"root\" -> \"fixture\";"));
        assert!(dot.contains("\"fixture\" -> \"t1\";"));
        assert!(dot.contains("\"t2\" -> \"t1\" [style=dashed, label=\"depends on\"];"));
    }

    #[test]
    fn dot_marks_explicit_commands_bold() {
        let dot = emit_dot(&commands(FilterSet::including(Filter::Name("T1".into()))));
        assert!(dot.contains("\"t1\" [label=\"T1\", style=bold];"));
    }

    #[test]
    fn escapes_quotes() {
        assert_eq!(escape(r#"say "hi""#), r#"say \"hi\""#);
    }
}
