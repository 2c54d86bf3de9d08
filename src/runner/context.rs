use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{TestOutcome, TestResult, TestStep};

/// Single-shot callback fired with the final outcome when a step finishes.
pub type FinishingCallback = Box<dyn FnOnce(&TestOutcome) + Send>;

/// Named log streams a step can write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Failures,
    Warnings,
    Output,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failures => write!(f, "failures"),
            Self::Warnings => write!(f, "warnings"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Runtime state of one started step.
///
/// A context is finished exactly once, by [`TestContext::finish_step`].
pub trait TestContext: Send {
    fn test_step(&self) -> &TestStep;

    /// Outcome recorded so far; `Passed` until something sets it.
    fn outcome(&self) -> TestOutcome;

    fn set_interim_outcome(&mut self, outcome: TestOutcome);

    fn log(&mut self, stream: LogStream, text: &str);

    fn add_assert_count(&mut self, count: u32);

    /// Register a callback fired with the final outcome just before the
    /// step is reported as finished.
    fn on_finishing(&mut self, callback: FinishingCallback);

    /// Finish the step. When `duration` is `None` the elapsed time since the
    /// step started is used.
    fn finish_step(self: Box<Self>, outcome: TestOutcome, duration: Option<Duration>)
    -> TestResult;
}

/// Creates contexts for steps. Implementations do their own locking.
pub trait TestContextManager: Send + Sync {
    fn start_step(&self, step: TestStep) -> Box<dyn TestContext>;
}

/// Receives step lifecycle events from an [`ObservableTestContextManager`].
pub trait TestListener: Send + Sync {
    fn step_started(&self, _step: &TestStep) {}

    fn step_logged(&self, _step: &TestStep, _stream: LogStream, _text: &str) {}

    fn step_finished(&self, _step: &TestStep, _result: &TestResult) {}
}

/// A listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTestListener;

impl TestListener for NullTestListener {}

/// Context manager that publishes step events to a [`TestListener`].
#[derive(Clone)]
pub struct ObservableTestContextManager {
    listener: Arc<dyn TestListener>,
}

impl ObservableTestContextManager {
    pub fn new(listener: Arc<dyn TestListener>) -> Self {
        Self { listener }
    }
}

impl Default for ObservableTestContextManager {
    fn default() -> Self {
        Self::new(Arc::new(NullTestListener))
    }
}

impl fmt::Debug for ObservableTestContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableTestContextManager")
            .finish_non_exhaustive()
    }
}

impl TestContextManager for ObservableTestContextManager {
    fn start_step(&self, step: TestStep) -> Box<dyn TestContext> {
        self.listener.step_started(&step);
        Box::new(ObservableTestContext {
            listener: Arc::clone(&self.listener),
            step,
            started: Instant::now(),
            outcome: TestOutcome::PASSED,
            assert_count: 0,
            logs: BTreeMap::new(),
            finishing: Vec::new(),
            finished: false,
        })
    }
}

const ORPHANED_MESSAGE: &str = "The test step was orphaned by the test runner!";

struct ObservableTestContext {
    listener: Arc<dyn TestListener>,
    step: TestStep,
    started: Instant,
    outcome: TestOutcome,
    assert_count: u32,
    logs: BTreeMap<LogStream, String>,
    finishing: Vec<FinishingCallback>,
    finished: bool,
}

impl ObservableTestContext {
    fn finish(&mut self, outcome: TestOutcome, duration: Option<Duration>) -> TestResult {
        self.finished = true;
        self.outcome = outcome;
        for callback in std::mem::take(&mut self.finishing) {
            callback(&self.outcome);
        }
        let result = TestResult {
            outcome: self.outcome.clone(),
            duration: duration.unwrap_or_else(|| self.started.elapsed()),
            assert_count: self.assert_count,
        };
        self.listener.step_finished(&self.step, &result);
        result
    }
}

impl TestContext for ObservableTestContext {
    fn test_step(&self) -> &TestStep {
        &self.step
    }

    fn outcome(&self) -> TestOutcome {
        self.outcome.clone()
    }

    fn set_interim_outcome(&mut self, outcome: TestOutcome) {
        self.outcome = outcome;
    }

    fn log(&mut self, stream: LogStream, text: &str) {
        let buffer = self.logs.entry(stream).or_default();
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(text);
        self.listener.step_logged(&self.step, stream, text);
    }

    fn add_assert_count(&mut self, count: u32) {
        self.assert_count = self.assert_count.saturating_add(count);
    }

    fn on_finishing(&mut self, callback: FinishingCallback) {
        self.finishing.push(callback);
    }

    fn finish_step(
        mut self: Box<Self>,
        outcome: TestOutcome,
        duration: Option<Duration>,
    ) -> TestResult {
        self.finish(outcome, duration)
    }
}

impl Drop for ObservableTestContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(step = %self.step.full_name(), "test step dropped before it finished");
        self.log(LogStream::Failures, ORPHANED_MESSAGE);
        self.finish(TestOutcome::ERROR, None);
    }
}
