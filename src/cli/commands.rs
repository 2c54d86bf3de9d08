use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use thiserror::Error;

use crate::emit::EmitError;
use crate::emit::dot::emit_dot;
use crate::emit::run_result::{emit_run_json, emit_run_yaml};
use crate::emit::yaml::{emit_json, emit_yaml};
use crate::filter::{FilterParseError, parse_filter_set};
use crate::model::def::{TestDef, lower};
use crate::model::{ModelError, TestTree, TreeError};
use crate::plan::types::PlanMetadata;
use crate::plan::{CommandPlan, CommandTree, DefaultTestCommandFactory, TestCommandFactory};
use crate::runner::context::{ObservableTestContextManager, TestContextManager};
use crate::runner::controller::TestController;
use crate::runner::delegating::DelegatingTestController;
use crate::runner::display::format_report;
use crate::runner::options::TestExecutionOptions;
use crate::runner::progress::ProgressTracker;
use crate::runner::registry::ControllerRegistry;
use crate::runner::report::ReportRecorder;

/// Errors surfaced by the command-line commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("{}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{}: {source}", .path.display())]
    Tree { path: PathBuf, source: TreeError },

    #[error("{}: {source}", .path.display())]
    Model { path: PathBuf, source: ModelError },

    #[error(transparent)]
    Filter(#[from] FilterParseError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("unknown format '{format}' (expected: {expected})")]
    UnknownFormat {
        format: String,
        expected: &'static str,
    },
}

/// A tree file: the test tree plus optional execution options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeFile {
    pub tree: TestDef,
    #[serde(default)]
    pub options: TestExecutionOptions,
}

/// Read a tree file. Files ending in `.json` are parsed as JSON, anything
/// else as YAML.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn load_tree_file(path: &Path) -> Result<TreeFile, CliError> {
    let input = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_owned(),
        source,
    })?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&input).map_err(|source| CliError::Json {
            path: path.to_owned(),
            source,
        })
    } else {
        serde_yaml::from_str(&input).map_err(|source| CliError::Yaml {
            path: path.to_owned(),
            source,
        })
    }
}

/// Command-line selection flags layered over a file's `options` block.
#[derive(Debug, Clone, Default)]
pub struct SelectionFlags {
    pub filter: Option<String>,
    pub exact: bool,
}

impl SelectionFlags {
    fn apply(&self, options: &mut TestExecutionOptions) -> Result<(), CliError> {
        if let Some(filter) = &self.filter {
            options.filter_set = parse_filter_set(filter)?;
        }
        options.exact_filter |= self.exact;
        Ok(())
    }
}

/// A loaded tree file lowered into a test tree, with its effective options.
struct Loaded {
    path: PathBuf,
    tests: Arc<TestTree>,
    options: TestExecutionOptions,
}

impl Loaded {
    fn read(path: &Path, flags: &SelectionFlags) -> Result<Self, CliError> {
        let file = load_tree_file(path)?;
        let tests = lower(&file.tree).map_err(|source| CliError::Tree {
            path: path.to_owned(),
            source,
        })?;
        let mut options = file.options;
        flags.apply(&mut options)?;
        Ok(Self {
            path: path.to_owned(),
            tests: Arc::new(tests),
            options,
        })
    }

    fn commands(
        &self,
        context_manager: Arc<dyn TestContextManager>,
    ) -> Result<Option<CommandTree>, CliError> {
        DefaultTestCommandFactory::default()
            .build_commands(
                Arc::clone(&self.tests),
                &self.options.filter_set,
                self.options.exact_filter,
                context_manager,
            )
            .map_err(|source| CliError::Model {
                path: self.path.clone(),
                source,
            })
    }

    fn empty_plan(&self) -> PlanMetadata {
        PlanMetadata {
            name: self.tests[self.tests.root()].name().to_owned(),
            filter: self.options.filter_set.to_string(),
            exact_filter: self.options.exact_filter,
            commands_total: 0,
            dependencies_total: 0,
        }
    }
}

fn write_output(path: &Path, contents: &str) -> Result<(), CliError> {
    std::fs::write(path, contents).map_err(|source| CliError::Write {
        path: path.to_owned(),
        source,
    })
}

/// Options for the `plan` command.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub output: Option<PathBuf>,
    pub format: String,
    pub selection: SelectionFlags,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            output: None,
            format: "yaml".to_owned(),
            selection: SelectionFlags::default(),
        }
    }
}

/// Run the `plan` command: build the filtered command tree and print it in
/// execution order.
///
/// # Errors
///
/// Returns an error if loading, filtering, validating or emitting fails.
pub fn run_plan(file: &Path, options: &PlanOptions) -> Result<String, CliError> {
    let loaded = Loaded::read(file, &options.selection)?;
    let commands = loaded.commands(Arc::new(ObservableTestContextManager::default()))?;

    let output = match (options.format.as_str(), &commands) {
        ("yaml", Some(commands)) => emit_yaml(&CommandPlan::from_tree(
            commands,
            &loaded.options.filter_set,
            loaded.options.exact_filter,
        ))?,
        ("json", Some(commands)) => emit_json(&CommandPlan::from_tree(
            commands,
            &loaded.options.filter_set,
            loaded.options.exact_filter,
        ))?,
        ("dot", Some(commands)) => emit_dot(commands),
        ("yaml" | "json" | "dot", None) => "no tests selected\n".to_owned(),
        (other, _) => {
            return Err(CliError::UnknownFormat {
                format: other.to_owned(),
                expected: "yaml, json, dot",
            });
        }
    };

    if let Some(out_path) = &options.output {
        write_output(out_path, &output)?;
        Ok(format!("plan written to {}\n", out_path.display()))
    } else {
        Ok(output)
    }
}

/// Run the `validate` command: build the unfiltered command tree and report
/// its size, or the first structural error.
///
/// # Errors
///
/// Returns an error if the tree cannot be loaded or fails validation.
pub fn run_validate(file: &Path) -> Result<String, CliError> {
    let mut loaded = Loaded::read(file, &SelectionFlags::default())?;
    loaded.options = TestExecutionOptions::default();
    let root_name = loaded.tests[loaded.tests.root()].name().to_owned();
    let commands = loaded.commands(Arc::new(ObservableTestContextManager::default()))?;
    let commands_total = commands.as_ref().map_or(0, CommandTree::len);
    Ok(format!(
        "{}: {root_name} is valid ({} tests, {} dependencies, {commands_total} commands)",
        file.display(),
        loaded.tests.len(),
        loaded.tests.dependency_count(),
    ))
}

/// Options for the `run` command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub file: PathBuf,
    pub selection: SelectionFlags,
    pub skip: bool,
    pub single_threaded: bool,
    pub format: String,
    pub output: Option<PathBuf>,
    pub verbose: bool,
}

/// Output formats accepted by the `run` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Text,
    Yaml,
    Json,
}

impl ReportFormat {
    fn parse(format: &str) -> Result<Self, CliError> {
        match format {
            "text" => Ok(Self::Text),
            "yaml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat {
                format: other.to_owned(),
                expected: "text, yaml, json",
            }),
        }
    }
}

/// Run the `run` command: execute the selected tests and print the report.
///
/// Returns `Ok(true)` if no test failed, `Ok(false)` otherwise.
///
/// # Errors
///
/// Returns an error if loading, validation or emitting fails. Test failures
/// are not errors.
pub fn run_run(options: &RunOptions) -> Result<bool, CliError> {
    let format = ReportFormat::parse(&options.format)?;

    let mut loaded = Loaded::read(&options.file, &options.selection)?;
    loaded.options.skip_test_execution |= options.skip;
    loaded.options.single_threaded |= options.single_threaded;

    let recorder = Arc::new(ReportRecorder::new());
    let commands =
        loaded.commands(Arc::new(ObservableTestContextManager::new(Arc::clone(&recorder) as _)))?;
    let controller = DelegatingTestController::new(Arc::new(ControllerRegistry::with_builtins()));

    let started = Instant::now();
    let plan = match &commands {
        Some(commands) => {
            let mut progress = ProgressTracker::new();
            controller.run(commands.root(), None, &loaded.options, &mut progress);
            CommandPlan::from_tree(
                commands,
                &loaded.options.filter_set,
                loaded.options.exact_filter,
            )
            .plan
        }
        None => loaded.empty_plan(),
    };
    let report = recorder.report(plan, controller.name(), started.elapsed());

    let output = match format {
        ReportFormat::Text => format_report(&report, options.verbose) + "\n",
        ReportFormat::Yaml => emit_run_yaml(&report)?,
        ReportFormat::Json => emit_run_json(&report)?,
    };

    if let Some(out_path) = &options.output {
        write_output(out_path, &output)?;
        eprintln!("results written to {}", out_path.display());
    } else {
        print!("{output}");
    }

    Ok(report.summary.success)
}
