use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{TestResult, TestStatus, TestStep};
use crate::plan::types::PlanMetadata;
use crate::runner::context::{LogStream, TestListener};

/// Serializable test run result for emitter output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRunReport {
    pub plan: PlanMetadata,
    pub run: RunMetadata,
    pub steps: Vec<StepReport>,
    pub summary: RunSummary,
}

/// Metadata about the run execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub controller: String,
    pub duration_ms: u64,
}

/// One finished step and the steps nested under it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepReport {
    pub name: String,
    pub full_name: String,
    pub test_id: String,
    pub test_case: bool,
    pub status: TestStatus,
    /// Display name of the outcome (`passed`, `error`, `canceled`, ...).
    pub outcome: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub assert_count: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub logs: BTreeMap<LogStream, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepReport>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl StepReport {
    /// This step and every step below it, parents first.
    pub fn flatten(&self) -> Vec<&StepReport> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }
}

/// Counts of finished test-case steps by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub inconclusive: usize,
    pub success: bool,
}

impl RunSummary {
    fn record(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Inconclusive => self.inconclusive += 1,
        }
    }
}

/// A [`TestListener`] that records every step of a run so it can be
/// turned into a [`TestRunReport`] afterwards.
#[derive(Debug, Default)]
pub struct ReportRecorder {
    state: Mutex<Recorded>,
}

#[derive(Debug, Default)]
struct Recorded {
    started: Vec<String>,
    steps: HashMap<String, RecordedStep>,
}

#[derive(Debug)]
struct RecordedStep {
    step: TestStep,
    logs: BTreeMap<LogStream, String>,
    result: Option<TestResult>,
}

impl ReportRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finished steps arranged by parent, each level in start order.
    pub fn steps(&self) -> Vec<StepReport> {
        let state = self.state();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut roots = Vec::new();
        for id in &state.started {
            let Some(recorded) = state.steps.get(id) else {
                continue;
            };
            match recorded.step.parent_id() {
                Some(parent) if state.steps.contains_key(parent) => {
                    children.entry(parent).or_default().push(id.as_str());
                }
                _ => roots.push(id.as_str()),
            }
        }
        roots
            .into_iter()
            .filter_map(|id| build_step(&state, &children, id))
            .collect()
    }

    /// Assemble the report for a run of `plan` by `controller`.
    pub fn report(&self, plan: PlanMetadata, controller: &str, duration: Duration) -> TestRunReport {
        let steps = self.steps();
        let mut summary = RunSummary::default();
        for step in steps.iter().flat_map(StepReport::flatten) {
            if step.test_case {
                summary.record(step.status);
            }
        }
        summary.success =
            summary.failed == 0 && steps.iter().all(|s| s.status != TestStatus::Failed);

        TestRunReport {
            plan,
            run: RunMetadata {
                controller: controller.to_owned(),
                duration_ms: duration.as_millis() as u64,
            },
            steps,
            summary,
        }
    }
}

fn build_step(
    state: &Recorded,
    children: &HashMap<&str, Vec<&str>>,
    id: &str,
) -> Option<StepReport> {
    let recorded = state.steps.get(id)?;
    let result = recorded.result.as_ref()?;
    let step = &recorded.step;
    Some(StepReport {
        name: step.name().to_owned(),
        full_name: step.full_name().to_owned(),
        test_id: step.test_id().to_owned(),
        test_case: step.is_test_case(),
        status: result.outcome.status(),
        outcome: result.outcome.to_string(),
        duration_ms: result.duration.as_millis() as u64,
        assert_count: result.assert_count,
        logs: recorded.logs.clone(),
        children: children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child| build_step(state, children, child))
            .collect(),
    })
}

impl TestListener for ReportRecorder {
    fn step_started(&self, step: &TestStep) {
        let mut state = self.state();
        state.started.push(step.id().to_owned());
        state.steps.insert(
            step.id().to_owned(),
            RecordedStep {
                step: step.clone(),
                logs: BTreeMap::new(),
                result: None,
            },
        );
    }

    fn step_logged(&self, step: &TestStep, stream: LogStream, text: &str) {
        if let Some(recorded) = self.state().steps.get_mut(step.id()) {
            let buffer = recorded.logs.entry(stream).or_default();
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(text);
        }
    }

    fn step_finished(&self, step: &TestStep, result: &TestResult) {
        if let Some(recorded) = self.state().steps.get_mut(step.id()) {
            recorded.result = Some(result.clone());
        }
    }
}
