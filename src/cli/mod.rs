//! DH-017: Command-line surface. Loads a recipe, then checks, plans or runs it.

use crate::core::error::RecipeError;
use crate::core::executor::{self, RunConfig, RunSummary};
use crate::core::parser;
use crate::core::types::{PolicyOverrides, Recipe, StderrCapture};
use crate::events::EventLog;
use crate::runtime::docker::DockerApi;
use crate::runtime::ContainerRuntime;
use clap::Args;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    /// Load and validate the recipe, then exit
    #[arg(long)]
    pub check: bool,

    /// List the steps that would run without touching any container
    #[arg(long, conflicts_with = "check")]
    pub dry_run: bool,

    /// Append run events as JSON lines to this file
    #[arg(long, value_name = "PATH")]
    pub events: Option<PathBuf>,

    /// Override the recipe's stderr policy for dumps
    #[arg(long, value_enum, value_name = "MODE")]
    pub stderr: Option<StderrCapture>,

    /// Write archives in place instead of via `<archive>.partial`
    #[arg(long)]
    pub no_atomic: bool,

    /// Docker daemon socket (default: `DOCKER_HOST`, then the local socket)
    #[arg(long, value_name = "PATH")]
    pub docker_socket: Option<PathBuf>,

    /// Suppress per-step progress on stderr
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunArgs {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            stderr: self.stderr,
            atomic_publish: if self.no_atomic { Some(false) } else { None },
        }
    }
}

/// Dispatch a CLI invocation against the Docker daemon.
pub fn dispatch(args: RunArgs) -> Result<(), RecipeError> {
    dispatch_with(&args, || DockerApi::connect(args.docker_socket.as_deref()))
}

/// Dispatch a CLI invocation. `connect` is only called once the recipe
/// has loaded and is about to run.
pub fn dispatch_with<R, F>(args: &RunArgs, connect: F) -> Result<(), RecipeError>
where
    R: ContainerRuntime,
    F: FnOnce() -> Result<R, RecipeError>,
{
    let recipe = load(&args.recipe, &args.overrides())?;

    if args.check {
        println!(
            "OK: {} ({} steps)",
            args.recipe.display(),
            recipe.steps.len()
        );
        return Ok(());
    }

    if args.dry_run {
        print_plan(&args.recipe, &recipe);
        return Ok(());
    }

    let runtime = connect()?;
    let mut log = EventLog::new(!args.quiet, args.events.clone());
    let summary = run(&args.recipe, &recipe, &runtime, &mut log)?;
    print_summary(&summary);
    Ok(())
}

/// Load a recipe, listing every finding when validation fails.
fn load(path: &Path, overrides: &PolicyOverrides) -> Result<Recipe, RecipeError> {
    parser::load_recipe_with(path, overrides).map_err(|e| {
        if e.findings().len() > 1 {
            for finding in e.findings() {
                eprintln!("  ERROR: {}", finding);
            }
        }
        e
    })
}

fn run(
    path: &Path,
    recipe: &Recipe,
    runtime: &dyn ContainerRuntime,
    log: &mut EventLog,
) -> Result<RunSummary, RecipeError> {
    let name = path.display().to_string();
    let cfg = RunConfig {
        recipe,
        recipe_name: &name,
        runtime,
    };
    executor::execute(&cfg, log)
}

fn print_plan(path: &Path, recipe: &Recipe) {
    println!(
        "Planning: {} ({} steps)",
        path.display(),
        recipe.steps.len()
    );
    for line in executor::plan(recipe) {
        println!("  {}", line);
    }
    println!();
    println!("Dry run, no containers touched.");
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Recipe complete: {} steps, {} bytes archived ({:.1}s)",
        summary.outcomes.len(),
        summary.bytes_archived(),
        summary.total_duration.as_secs_f64()
    );
}
