use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::model::{Test, TestOutcome, TestResult, TestStep};
use crate::plan::TestCommand;
use crate::runner::controller::{ExecutionError, TestController, run_guarded, skip_all};
use crate::runner::options::TestExecutionOptions;
use crate::runner::progress::ProgressMonitor;

/// Picks the controller that should own a subtree, if any.
pub trait TestControllerProvider: Send + Sync {
    fn controller_for(&self, test: &Test) -> Option<Arc<dyn TestController>>;
}

impl<F> TestControllerProvider for F
where
    F: Fn(&Test) -> Option<Arc<dyn TestController>> + Send + Sync,
{
    fn controller_for(&self, test: &Test) -> Option<Arc<dyn TestController>> {
        self(test)
    }
}

/// Walks the command tree and hands each subtree to the controller its
/// provider names. Subtrees without one are walked here: a step is started
/// for the command, its children are run in order and their outcomes are
/// combined into the command's outcome.
#[derive(Clone)]
pub struct DelegatingTestController {
    provider: Arc<dyn TestControllerProvider>,
}

impl DelegatingTestController {
    pub fn new(provider: Arc<dyn TestControllerProvider>) -> Self {
        Self { provider }
    }

    fn run_command(
        &self,
        command: TestCommand<'_>,
        parent_step: Option<&TestStep>,
        options: &TestExecutionOptions,
        progress: &mut dyn ProgressMonitor,
    ) -> TestResult {
        if let Some(controller) = self.provider.controller_for(command.test()) {
            debug!(
                controller = controller.name(),
                test = %command.full_name(),
                "delegating subtree"
            );
            let mut sub = progress.create_sub_progress_monitor(command.test_count() as f64);
            return run_guarded(controller.as_ref(), command, parent_step, options, &mut sub);
        }

        progress.set_status(&command.full_name());
        let context = command.start_primary_child_step(parent_step);
        let mut outcome = TestOutcome::PASSED;
        let mut canceled = false;
        for child in command.children() {
            if progress.is_canceled() {
                canceled = true;
                break;
            }
            let result = self.run_command(child, Some(context.test_step()), options, progress);
            outcome = outcome.combine_with(&result.outcome).generalize();
        }
        if canceled || progress.is_canceled() {
            outcome = TestOutcome::CANCELED;
        }
        let result = context.finish_step(outcome, None);
        progress.worked(1.0);
        result
    }
}

impl fmt::Debug for DelegatingTestController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatingTestController")
            .finish_non_exhaustive()
    }
}

impl TestController for DelegatingTestController {
    fn name(&self) -> &str {
        "delegating"
    }

    #[tracing::instrument(skip_all, fields(test = %root.full_name(), commands = root.test_count()))]
    fn run_impl(
        &self,
        root: TestCommand<'_>,
        parent_step: Option<&TestStep>,
        options: &TestExecutionOptions,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<TestResult, ExecutionError> {
        progress.begin_task("Running tests.", root.test_count() as f64);
        let result = if options.skip_test_execution {
            skip_all(root, parent_step, progress)
        } else {
            self.run_command(root, parent_step, options, progress)
        };
        progress.done();
        Ok(result)
    }
}
