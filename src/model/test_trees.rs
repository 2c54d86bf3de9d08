//! Shared test tree builders for unit tests across the crate.
//!
//! `sample_tree` is the canonical shape most suites use:
//!
//! ```text
//! Root
//!   +- A
//!   |  +- A1
//!   |  +- A2
//!   |  +- A3
//!   +- B
//!      +- B1
//! ```

use crate::model::{Test, TestIndex, TestTree};

/// Test ids in these trees are the lowercased names.
pub fn sample_tree() -> TestTree {
    let mut tree = TestTree::new(Test::new("root", "Root")).unwrap();
    let root = tree.root();
    let a = tree.add_child(root, Test::new("a", "A")).unwrap();
    for name in ["A1", "A2", "A3"] {
        tree.add_child(a, case(name, 0)).unwrap();
    }
    let b = tree.add_child(root, Test::new("b", "B")).unwrap();
    tree.add_child(b, case("B1", 0)).unwrap();
    tree
}

/// `Root -> Fixture -> {T1, T2}`, with no dependencies declared yet.
pub fn fixture_tree() -> TestTree {
    let mut tree = TestTree::new(Test::new("root", "Root")).unwrap();
    let fixture = tree
        .add_child(tree.root(), Test::new("fixture", "Fixture"))
        .unwrap();
    tree.add_child(fixture, case("T1", 0)).unwrap();
    tree.add_child(fixture, case("T2", 0)).unwrap();
    tree
}

/// A leaf test case whose id is its lowercased name.
pub fn case(name: &str, order: i32) -> Test {
    Test::new(name.to_lowercase(), name)
        .with_order(order)
        .with_test_case(true)
}

/// Find a test by name, panicking when absent.
pub fn test_named(tree: &TestTree, name: &str) -> TestIndex {
    tree.pre_order()
        .into_iter()
        .find(|&i| tree[i].name() == name)
        .unwrap_or_else(|| panic!("did not find test named '{name}'"))
}

/// Declare `from -> to` between two tests looked up by name.
pub fn depend(tree: &mut TestTree, from: &str, to: &str) {
    let from = test_named(tree, from);
    let to = test_named(tree, to);
    tree.add_dependency(from, to);
}
