use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use cmdtree::cli::commands::{self, PlanOptions, RunOptions, SelectionFlags};

#[derive(Parser)]
#[command(
    name = "cmdtree",
    about = "Plan and run filtered, dependency-ordered test trees",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct Selection {
    /// Filter set, e.g. "include name:T1; exclude category:slow"
    #[arg(long)]
    filter: Option<String>,

    /// Keep only tests matched by an inclusion rule, not their descendants
    #[arg(long)]
    exact: bool,
}

impl From<Selection> for SelectionFlags {
    fn from(selection: Selection) -> Self {
        Self {
            filter: selection.filter,
            exact: selection.exact,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ordered command plan for a tree file
    Plan {
        /// Tree file (.yaml, .yml or .json)
        file: PathBuf,

        #[command(flatten)]
        selection: Selection,

        /// Output format: yaml, json, dot
        #[arg(long, default_value = "yaml")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a tree file for structural and dependency errors
    Validate {
        /// Tree file (.yaml, .yml or .json)
        file: PathBuf,
    },

    /// Execute the selected tests and print a report
    Run {
        /// Tree file (.yaml, .yml or .json)
        file: PathBuf,

        #[command(flatten)]
        selection: Selection,

        /// Report every selected test as skipped without running it
        #[arg(long)]
        skip: bool,

        /// Run on the calling thread instead of a worker thread
        #[arg(long)]
        single_threaded: bool,

        /// Output format: text, yaml, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include each step's output log in text reports
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Plan {
            file,
            selection,
            format,
            output,
        }) => {
            let options = PlanOptions {
                output,
                format,
                selection: selection.into(),
            };
            match commands::run_plan(&file, &options) {
                Ok(result) => print!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Validate { file }) => match commands::run_validate(&file) {
            Ok(result) => println!("{result}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        Some(Commands::Run {
            file,
            selection,
            skip,
            single_threaded,
            format,
            output,
            verbose,
        }) => {
            let options = RunOptions {
                file,
                selection: selection.into(),
                skip,
                single_threaded,
                format,
                output,
                verbose,
            };
            match commands::run_run(&options) {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            }
        }
        None => {
            // No subcommand: let clap print the help text
            Cli::parse_from(["cmdtree", "--help"]);
        }
    }
}
