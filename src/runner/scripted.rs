use std::collections::HashMap;

use tracing::{debug, warn};

use crate::model::{Test, TestOutcome, TestResult, TestStatus, TestStep};
use crate::plan::{CommandIndex, TestCommand};
use crate::runner::context::LogStream;
use crate::runner::controller::{ExecutionError, TestController};
use crate::runner::options::TestExecutionOptions;
use crate::runner::progress::ProgressMonitor;

/// Metadata key holding a test case's declared outcome. Defaults to `passed`.
pub const OUTCOME_METADATA_KEY: &str = "outcome";
/// Metadata key holding text logged by a test case when it runs.
pub const MESSAGE_METADATA_KEY: &str = "message";

const UNSATISFIED_DEPENDENCY: &str = "Skipped due to an unsatisfied test dependency.";

/// Runs a subtree whose test cases declare their outcome in metadata.
///
/// Commands run in command-tree order. Each one is skipped with a warning
/// when a dependency has failed, and containers finish with the generalized
/// combination of their children.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedTestController;

impl TestController for ScriptedTestController {
    fn name(&self) -> &str {
        "scripted"
    }

    #[tracing::instrument(skip_all, fields(test = %root.full_name()))]
    fn run_impl(
        &self,
        root: TestCommand<'_>,
        parent_step: Option<&TestStep>,
        _options: &TestExecutionOptions,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<TestResult, ExecutionError> {
        let script = Script::read(root)?;
        progress.begin_task("Running scripted tests.", root.test_count() as f64);
        let result = script.run(root, parent_step, progress);
        progress.done();
        Ok(result)
    }
}

/// Declared outcomes of every test case in a subtree, read up front so a
/// malformed declaration fails before any step starts.
struct Script {
    outcomes: HashMap<CommandIndex, TestOutcome>,
}

impl Script {
    fn read(root: TestCommand<'_>) -> Result<Self, ExecutionError> {
        let mut outcomes = HashMap::new();
        for command in root.pre_order() {
            if command.test().is_test_case() {
                outcomes.insert(command.index(), declared_outcome(command.test())?);
            }
        }
        Ok(Self { outcomes })
    }

    fn run(
        &self,
        command: TestCommand<'_>,
        parent_step: Option<&TestStep>,
        progress: &mut dyn ProgressMonitor,
    ) -> TestResult {
        progress.set_status(&command.full_name());
        let mut context = command.start_primary_child_step(parent_step);

        if progress.is_canceled() {
            progress.worked(command.test_count() as f64);
            return context.finish_step(TestOutcome::CANCELED, None);
        }

        if !command.are_dependencies_satisfied() {
            debug!(test = %command.full_name(), "dependency failed, skipping");
            context.log(LogStream::Warnings, UNSATISFIED_DEPENDENCY);
            progress.worked(command.test_count() as f64);
            return context.finish_step(TestOutcome::SKIPPED, None);
        }

        let mut outcome = TestOutcome::PASSED;
        if let Some(declared) = self.outcomes.get(&command.index()) {
            if let Some(message) = command.test().metadata_value(MESSAGE_METADATA_KEY) {
                let stream = if declared.status() == TestStatus::Failed {
                    LogStream::Failures
                } else {
                    LogStream::Output
                };
                context.log(stream, message);
            }
            context.add_assert_count(1);
            outcome = declared.clone();
        }

        let mut canceled = false;
        for child in command.children() {
            if progress.is_canceled() {
                canceled = true;
                break;
            }
            let result = self.run(child, Some(context.test_step()), progress);
            outcome = outcome.combine_with(&result.outcome).generalize();
        }
        if canceled {
            warn!(test = %command.full_name(), "run canceled");
            outcome = TestOutcome::CANCELED;
        }

        let result = context.finish_step(outcome, None);
        progress.worked(1.0);
        result
    }
}

fn declared_outcome(test: &Test) -> Result<TestOutcome, ExecutionError> {
    Ok(test
        .metadata_value(OUTCOME_METADATA_KEY)
        .map(str::parse::<TestOutcome>)
        .transpose()?
        .unwrap_or(TestOutcome::PASSED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::filter::FilterSet;
    use crate::model::TestTree;
    use crate::model::test_trees::case;
    use crate::plan::{CommandTree, DefaultTestCommandFactory, TestCommandFactory};
    use crate::runner::context::{ObservableTestContextManager, TestListener};
    use crate::runner::progress::{CancelHandle, NullProgressMonitor, ProgressTracker};

    #[derive(Default)]
    struct Recorder {
        finished: Mutex<Vec<(String, TestOutcome, u32)>>,
        logs: Mutex<Vec<(String, LogStream, String)>>,
    }

    impl TestListener for Recorder {
        fn step_logged(&self, step: &TestStep, stream: LogStream, text: &str) {
            self.logs
                .lock()
                .unwrap()
                .push((step.name().to_owned(), stream, text.to_owned()));
        }

        fn step_finished(&self, step: &TestStep, result: &TestResult) {
            self.finished.lock().unwrap().push((
                step.name().to_owned(),
                result.outcome.clone(),
                result.assert_count,
            ));
        }
    }

    impl Recorder {
        fn outcome_of(&self, name: &str) -> Option<TestOutcome> {
            self.finished
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, o, _)| o.clone())
        }
    }

    /// `Root -> {Fixture -> {T1, T2}, T3}` with T2 depending on T1.
    fn scripted_tree(t1: &str, t3: &str) -> TestTree {
        let mut tree = TestTree::new(Test::new("root", "Root")).unwrap();
        let fixture = tree
            .add_child(tree.root(), Test::new("fixture", "Fixture"))
            .unwrap();
        let t1 = tree
            .add_child(
                fixture,
                case("T1", 0)
                    .with_metadata(OUTCOME_METADATA_KEY, t1)
                    .with_metadata(MESSAGE_METADATA_KEY, "expected 2, got 3"),
            )
            .unwrap();
        let t2 = tree.add_child(fixture, case("T2", 0)).unwrap();
        tree.add_dependency(t2, t1);
        tree.add_child(
            tree.root(),
            case("T3", 0).with_metadata(OUTCOME_METADATA_KEY, t3),
        )
        .unwrap();
        tree
    }

    fn build(tree: TestTree, recorder: Arc<Recorder>) -> CommandTree {
        DefaultTestCommandFactory::default()
            .build_commands(
                Arc::new(tree),
                &FilterSet::empty(),
                false,
                Arc::new(ObservableTestContextManager::new(recorder)),
            )
            .unwrap()
            .unwrap()
    }

    fn options() -> TestExecutionOptions {
        TestExecutionOptions {
            single_threaded: true,
            ..TestExecutionOptions::default()
        }
    }

    #[test]
    fn declared_outcomes_drive_results() {
        let recorder = Arc::new(Recorder::default());
        let commands = build(scripted_tree("failed", "error"), Arc::clone(&recorder));
        let result = ScriptedTestController.run(
            commands.root(),
            None,
            &options(),
            &mut NullProgressMonitor,
        );

        assert_eq!(recorder.outcome_of("T1"), Some(TestOutcome::FAILED));
        assert_eq!(recorder.outcome_of("T3"), Some(TestOutcome::ERROR));
        assert_eq!(recorder.outcome_of("Fixture"), Some(TestOutcome::FAILED));
        assert_eq!(result.outcome, TestOutcome::FAILED);
    }

    #[test]
    fn failed_dependency_skips_dependent_with_warning() {
        let recorder = Arc::new(Recorder::default());
        let commands = build(scripted_tree("failed", "passed"), Arc::clone(&recorder));
        ScriptedTestController.run(commands.root(), None, &options(), &mut NullProgressMonitor);

        assert_eq!(recorder.outcome_of("T2"), Some(TestOutcome::SKIPPED));
        let logs = recorder.logs.lock().unwrap();
        assert!(logs.contains(&(
            "T2".to_owned(),
            LogStream::Warnings,
            UNSATISFIED_DEPENDENCY.to_owned()
        )));
        assert!(logs.contains(&(
            "T1".to_owned(),
            LogStream::Failures,
            "expected 2, got 3".to_owned()
        )));
    }

    #[test]
    fn passing_dependency_lets_dependent_run() {
        let recorder = Arc::new(Recorder::default());
        let commands = build(scripted_tree("passed", "passed"), Arc::clone(&recorder));
        let result = ScriptedTestController.run(
            commands.root(),
            None,
            &options(),
            &mut NullProgressMonitor,
        );

        assert_eq!(recorder.outcome_of("T2"), Some(TestOutcome::PASSED));
        assert_eq!(result.outcome, TestOutcome::PASSED);
        let logs = recorder.logs.lock().unwrap();
        assert_eq!(logs[0].1, LogStream::Output);
        let finished = recorder.finished.lock().unwrap();
        let t1 = finished.iter().find(|(n, _, _)| n == "T1").unwrap();
        assert_eq!(t1.2, 1);
    }

    #[test]
    fn malformed_outcome_fails_before_any_step_runs() {
        let recorder = Arc::new(Recorder::default());
        let commands = build(scripted_tree("bogus", "passed"), Arc::clone(&recorder));
        let result = ScriptedTestController.run(
            commands.root(),
            None,
            &options(),
            &mut NullProgressMonitor,
        );

        assert_eq!(result.outcome, TestOutcome::ERROR);
        let finished = recorder.finished.lock().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].0, "Root");
        let logs = recorder.logs.lock().unwrap();
        assert!(logs[0].2.contains("unknown test outcome 'bogus'"));
    }

    #[test]
    fn cancellation_finishes_remaining_commands_canceled() {
        let recorder = Arc::new(Recorder::default());
        let commands = build(scripted_tree("passed", "passed"), Arc::clone(&recorder));
        let cancel = CancelHandle::new();
        cancel.cancel();
        let mut progress = ProgressTracker::with_cancel_handle(cancel);
        let result = ScriptedTestController.run(commands.root(), None, &options(), &mut progress);

        assert_eq!(result.outcome, TestOutcome::CANCELED);
        assert_eq!(recorder.finished.lock().unwrap().len(), 1);
        assert!(progress.is_done());
    }

    #[test]
    fn declared_outcome_defaults_to_passed() {
        assert_eq!(
            declared_outcome(&Test::new("t", "T")).unwrap(),
            TestOutcome::PASSED
        );
        assert_eq!(
            declared_outcome(&Test::new("t", "T").with_metadata(OUTCOME_METADATA_KEY, "ignored"))
                .unwrap(),
            TestOutcome::IGNORED
        );
        assert!(matches!(
            declared_outcome(&Test::new("t", "T").with_metadata(OUTCOME_METADATA_KEY, "nope")),
            Err(ExecutionError::Outcome(_))
        ));
    }
}
