use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::error::TreeError;
use crate::model::tree::{Test, TestIndex, TestTree};

/// Document form of a test tree, as read from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestDef {
    /// Defaults to the slash-joined path of names from the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub order: i32,
    /// Defaults to `true` for tests without children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestDef>,
}

impl TestDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            order: 0,
            test_case: None,
            depends_on: Vec::new(),
            metadata: BTreeMap::new(),
            children: Vec::new(),
        }
    }
}

/// Lower a document into a [`TestTree`].
///
/// Nodes are materialized first; `depends_on` ids are resolved in a second
/// pass once every id is known.
///
/// # Errors
///
/// Returns [`TreeError`] for empty or duplicate ids and names, and for
/// dependencies on ids that are not in the document.
pub fn lower(def: &TestDef) -> Result<TestTree, TreeError> {
    let mut pending = Vec::new();
    let root_id = def.id.clone().unwrap_or_else(|| def.name.clone());
    let mut tree = TestTree::new(to_test(def, root_id.clone()))?;
    let root = tree.root();
    pending.push((root, &def.depends_on));
    for child in &def.children {
        materialize(&mut tree, root, &root_id, child, &mut pending)?;
    }

    for (test, depends_on) in pending {
        for id in depends_on {
            let on = tree.find(id).ok_or_else(|| TreeError::UnknownDependency {
                test: tree.full_name(test),
                dependency: id.clone(),
            })?;
            tree.add_dependency(test, on);
        }
    }
    Ok(tree)
}

fn materialize<'d>(
    tree: &mut TestTree,
    parent: TestIndex,
    parent_path: &str,
    def: &'d TestDef,
    pending: &mut Vec<(TestIndex, &'d Vec<String>)>,
) -> Result<(), TreeError> {
    let path = format!("{parent_path}/{}", def.name);
    let id = def.id.clone().unwrap_or_else(|| path.clone());
    let index = tree.add_child(parent, to_test(def, id))?;
    pending.push((index, &def.depends_on));
    for child in &def.children {
        materialize(tree, index, &path, child, pending)?;
    }
    Ok(())
}

fn to_test(def: &TestDef, id: String) -> Test {
    let is_test_case = def.test_case.unwrap_or(def.children.is_empty());
    def.metadata.iter().fold(
        Test::new(id, def.name.clone())
            .with_order(def.order)
            .with_test_case(is_test_case),
        |test, (key, value)| test.with_metadata(key.clone(), value.clone()),
    )
}
