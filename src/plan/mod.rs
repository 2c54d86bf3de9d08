//! Turning a filtered test tree into an ordered command tree.

pub mod command;
pub mod factory;
pub mod order;
pub mod types;

pub use command::{CommandIndex, CommandTree, PreOrder, TestCommand};
pub use factory::{DefaultTestCommandFactory, TestCommandFactory};
pub use order::{DefaultTestOrderStrategy, TestOrderStrategy};
pub use types::CommandPlan;
