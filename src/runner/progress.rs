use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

/// Progress reporting and cooperative cancellation for a run.
pub trait ProgressMonitor: Send {
    fn begin_task(&mut self, name: &str, total_work: f64);

    fn set_status(&mut self, status: &str);

    /// Report `amount` units of completed work.
    fn worked(&mut self, amount: f64);

    fn is_canceled(&self) -> bool;

    /// Mark the current task complete.
    fn done(&mut self);
}

impl<'a> dyn ProgressMonitor + 'a {
    /// Hand `parent_work` units of this monitor's task to a nested task.
    ///
    /// Whatever the nested task does not report is credited when the
    /// returned monitor is dropped.
    pub fn create_sub_progress_monitor(
        &mut self,
        parent_work: f64,
    ) -> SubProgressMonitor<'_, dyn ProgressMonitor + 'a> {
        SubProgressMonitor::new(self, parent_work)
    }
}

/// A scoped share of a parent monitor's work.
pub struct SubProgressMonitor<'p, P: ProgressMonitor + ?Sized> {
    parent: &'p mut P,
    parent_work: f64,
    total_work: f64,
    reported: f64,
}

impl<'p, P: ProgressMonitor + ?Sized> SubProgressMonitor<'p, P> {
    pub fn new(parent: &'p mut P, parent_work: f64) -> Self {
        Self {
            parent,
            parent_work: parent_work.max(0.0),
            total_work: 0.0,
            reported: 0.0,
        }
    }

    fn report(&mut self, parent_amount: f64) {
        let amount = parent_amount.min(self.parent_work - self.reported);
        if amount > 0.0 {
            self.reported += amount;
            self.parent.worked(amount);
        }
    }
}

impl<P: ProgressMonitor + ?Sized> ProgressMonitor for SubProgressMonitor<'_, P> {
    fn begin_task(&mut self, name: &str, total_work: f64) {
        self.total_work = total_work.max(0.0);
        self.parent.set_status(name);
    }

    fn set_status(&mut self, status: &str) {
        self.parent.set_status(status);
    }

    fn worked(&mut self, amount: f64) {
        if self.total_work > 0.0 {
            self.report(amount * self.parent_work / self.total_work);
        }
    }

    fn is_canceled(&self) -> bool {
        self.parent.is_canceled()
    }

    fn done(&mut self) {
        self.report(self.parent_work);
    }
}

impl<P: ProgressMonitor + ?Sized> Drop for SubProgressMonitor<'_, P> {
    fn drop(&mut self) {
        self.done();
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Top-level monitor that tracks completed work and logs progress.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    task: String,
    status: String,
    total_work: f64,
    completed: f64,
    finished: bool,
    cancel: CancelHandle,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that reports cancellation whenever `cancel` is triggered.
    pub fn with_cancel_handle(cancel: CancelHandle) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn total_work(&self) -> f64 {
        self.total_work
    }

    pub fn completed_work(&self) -> f64 {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.finished
    }
}

impl ProgressMonitor for ProgressTracker {
    fn begin_task(&mut self, name: &str, total_work: f64) {
        debug!(task = name, total_work, "progress task started");
        self.task = name.to_owned();
        self.total_work = total_work;
        self.completed = 0.0;
        self.finished = false;
    }

    fn set_status(&mut self, status: &str) {
        trace!(status, "progress status");
        status.clone_into(&mut self.status);
    }

    fn worked(&mut self, amount: f64) {
        self.completed = (self.completed + amount).min(self.total_work);
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn done(&mut self) {
        if !self.finished {
            self.finished = true;
            self.completed = self.total_work;
            debug!(task = %self.task, "progress task done");
        }
    }
}

/// Monitor that discards progress and is never canceled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {
    fn begin_task(&mut self, _name: &str, _total_work: f64) {}

    fn set_status(&mut self, _status: &str) {}

    fn worked(&mut self, _amount: f64) {}

    fn is_canceled(&self) -> bool {
        false
    }

    fn done(&mut self) {}
}
