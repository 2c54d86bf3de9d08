//! The declarative test tree and the values the engine produces while
//! walking it: steps, outcomes and results.

pub mod def;
pub mod error;
pub mod outcome;
pub mod step;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_trees;

pub use error::{ModelError, TreeError};
pub use outcome::{OutcomeParseError, TestOutcome, TestStatus};
pub use step::{TestResult, TestStep};
pub use tree::{Test, TestIndex, TestTree};
