use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use thiserror::Error;
use tracing::{error, warn};

use crate::model::{OutcomeParseError, TestOutcome, TestResult, TestStep};
use crate::plan::TestCommand;
use crate::runner::context::LogStream;
use crate::runner::options::TestExecutionOptions;
use crate::runner::progress::ProgressMonitor;

const WORKER_THREAD_NAME: &str = "test-runner";
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Errors a controller can raise while running a subtree.
///
/// They never escape [`TestController::run`]; the command being run is
/// reported as an Error step instead.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("controller '{controller}' failed: {message}")]
    Controller { controller: String, message: String },

    #[error(transparent)]
    Outcome(#[from] OutcomeParseError),
}

/// Runs a command subtree and reports one result for its root.
pub trait TestController: Send + Sync {
    fn name(&self) -> &str;

    /// Run `root` and its subtree, nesting its steps under `parent_step`.
    ///
    /// The whole invocation runs on one dedicated worker thread unless
    /// `options.single_threaded` is set, in which case it runs on the
    /// caller's thread. Errors and panics from [`run_impl`](Self::run_impl)
    /// are reported as an Error step for `root`; this never fails.
    fn run(
        &self,
        root: TestCommand<'_>,
        parent_step: Option<&TestStep>,
        options: &TestExecutionOptions,
        progress: &mut dyn ProgressMonitor,
    ) -> TestResult {
        if options.single_threaded {
            return run_guarded(self, root, parent_step, options, progress);
        }

        let dispatched = thread::scope(|scope| {
            let worker_progress = &mut *progress;
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_owned())
                .stack_size(WORKER_STACK_SIZE)
                .spawn_scoped(scope, move || {
                    run_guarded(self, root, parent_step, options, worker_progress)
                })
                .map(|worker| worker.join())
                .map_err(|err| {
                    warn!(error = %err, "could not start worker thread, running on caller thread");
                })
                .ok()
        });

        match dispatched {
            Some(Ok(result)) => result,
            Some(Err(payload)) => report_error(root, parent_step, &panic_message(&*payload)),
            None => run_guarded(self, root, parent_step, options, progress),
        }
    }

    /// Controller-specific execution.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] when the subtree cannot be run. The caller
    /// turns it into an Error step.
    fn run_impl(
        &self,
        root: TestCommand<'_>,
        parent_step: Option<&TestStep>,
        options: &TestExecutionOptions,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<TestResult, ExecutionError>;
}

/// Call `run_impl` on the current thread, trapping errors and panics.
pub fn run_guarded<C: TestController + ?Sized>(
    controller: &C,
    root: TestCommand<'_>,
    parent_step: Option<&TestStep>,
    options: &TestExecutionOptions,
    progress: &mut dyn ProgressMonitor,
) -> TestResult {
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        controller.run_impl(root, parent_step, options, &mut *progress)
    }));
    let message = match attempt {
        Ok(Ok(result)) => return result,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => panic_message(&*payload),
    };
    error!(
        controller = controller.name(),
        test = %root.full_name(),
        %message,
        "test controller failed"
    );
    report_error(root, parent_step, &message)
}

/// Record a failure of `command` as a finished Error step carrying
/// `message` in its failure log.
pub fn report_error(
    command: TestCommand<'_>,
    parent_step: Option<&TestStep>,
    message: &str,
) -> TestResult {
    let mut context = command.start_primary_child_step(parent_step);
    context.log(
        LogStream::Failures,
        &format!("Fatal error in test controller: {message}"),
    );
    context.finish_step(TestOutcome::ERROR, None)
}

/// Start and immediately skip a step for `command` and every command below
/// it, preserving the report structure without running anything.
pub fn skip_all(
    command: TestCommand<'_>,
    parent_step: Option<&TestStep>,
    progress: &mut dyn ProgressMonitor,
) -> TestResult {
    let context = command.start_primary_child_step(parent_step);
    for child in command.children() {
        skip_all(child, Some(context.test_step()), progress);
    }
    progress.worked(1.0);
    context.finish_step(TestOutcome::SKIPPED, None)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "test controller panicked".to_owned()
    }
}

/// Controller that skips every command in the subtree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipAllTestController;

impl TestController for SkipAllTestController {
    fn name(&self) -> &str {
        "skip-all"
    }

    fn run_impl(
        &self,
        root: TestCommand<'_>,
        parent_step: Option<&TestStep>,
        _options: &TestExecutionOptions,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<TestResult, ExecutionError> {
        progress.begin_task("Skipping tests.", root.test_count() as f64);
        let result = skip_all(root, parent_step, progress);
        progress.done();
        Ok(result)
    }
}
