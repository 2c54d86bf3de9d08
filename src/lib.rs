//! Filtered, dependency-ordered test command trees and a recursive test
//! execution engine.
//!
//! A [`model::TestTree`] is filtered by a [`filter::TestFilterEvaluator`]
//! into a [`plan::CommandTree`] whose siblings are ordered so dependencies
//! run first. A [`runner::TestController`] then walks the command tree,
//! reporting each step through a [`runner::TestContextManager`].

pub mod cli;
pub mod emit;
pub mod filter;
pub mod model;
pub mod plan;
pub mod runner;
