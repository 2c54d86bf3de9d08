use thiserror::Error;

/// Errors raised while assembling a [`TestTree`](crate::model::TestTree).
///
/// These are argument errors: they are detected before the tree is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// A test was given an empty id.
    #[error("test '{name}' has an empty id")]
    EmptyId { name: String },

    /// A test was given an empty name.
    #[error("test with id '{id}' has an empty name")]
    EmptyName { id: String },

    /// Two tests share the same id.
    #[error("duplicate test id '{id}'")]
    DuplicateId { id: String },

    /// A dependency refers to an id that is not in the tree.
    #[error("test '{test}' depends on unknown test id '{dependency}'")]
    UnknownDependency { test: String, dependency: String },
}

/// Errors raised while turning a test tree into a command tree.
///
/// Any of these aborts construction: no command tree is produced and
/// no test runs. Every variant names the offending tests by full name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("test '{test}' has an invalid dependency on itself")]
    SelfDependency { test: String },

    #[error("test '{test}' has an invalid dependency on its own ancestor '{ancestor}'")]
    AncestorDependency { test: String, ancestor: String },

    #[error("test '{test}' has an invalid dependency on its own descendant '{descendant}'")]
    DescendantDependency { test: String, descendant: String },

    #[error(
        "found a test dependency cycle involving test '{test}' (participants: {})",
        .participants.join(", ")
    )]
    DependencyCycle {
        test: String,
        participants: Vec<String>,
    },
}

impl ModelError {
    /// Full names of every test the error refers to.
    pub fn tests(&self) -> Vec<&str> {
        match self {
            Self::SelfDependency { test } => vec![test],
            Self::AncestorDependency { test, ancestor } => vec![test, ancestor],
            Self::DescendantDependency { test, descendant } => vec![test, descendant],
            Self::DependencyCycle { participants, .. } => {
                participants.iter().map(String::as_str).collect()
            }
        }
    }
}
