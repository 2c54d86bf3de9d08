pub mod context;
pub mod controller;
pub mod delegating;
pub mod display;
pub mod options;
pub mod progress;
pub mod registry;
pub mod report;
pub mod scripted;

pub use context::{LogStream, ObservableTestContextManager, TestContext, TestContextManager, TestListener};
pub use controller::{ExecutionError, SkipAllTestController, TestController};
pub use delegating::{DelegatingTestController, TestControllerProvider};
pub use options::TestExecutionOptions;
pub use progress::{CancelHandle, NullProgressMonitor, ProgressMonitor, ProgressTracker};
pub use registry::ControllerRegistry;
pub use report::{ReportRecorder, TestRunReport};
pub use scripted::ScriptedTestController;
