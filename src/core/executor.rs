//! DH-004: Executor. Runs a recipe's steps in declaration order.
//!
//! load -> validate -> for each step: dispatch -> handler -> runtime -> events
//!
//! Strictly sequential and fail-fast: step N+1 never starts before step N
//! returns, and the first failure stops the run. Steps already applied
//! stay applied.

use super::backup::{self, BackupReport};
use super::container;
use super::error::RecipeError;
use super::types::*;
use crate::events::{clock, EventLog, RunEvent};
use crate::runtime::ContainerRuntime;
use std::time::{Duration, Instant};

/// Configuration for a run.
pub struct RunConfig<'a> {
    pub recipe: &'a Recipe,
    /// Label for the recipe in events (usually its path)
    pub recipe_name: &'a str,
    pub runtime: &'a dyn ContainerRuntime,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Started(String),
    Stopped(String),
    BackedUp(BackupReport),
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub outcomes: Vec<StepOutcome>,
    pub total_duration: Duration,
}

impl RunSummary {
    /// Uncompressed bytes archived across all backup steps.
    pub fn bytes_archived(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o {
                StepOutcome::BackedUp(r) => r.bytes_written,
                _ => 0,
            })
            .sum()
    }
}

/// Execute every step of the recipe.
pub fn execute(cfg: &RunConfig, log: &mut EventLog) -> Result<RunSummary, RecipeError> {
    let start = Instant::now();
    let run_id = clock::generate_run_id();

    log.emit(RunEvent::RunStarted {
        run_id: run_id.clone(),
        recipe: cfg.recipe_name.to_string(),
        steps: cfg.recipe.steps.len(),
        dockhand_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let mut outcomes = Vec::with_capacity(cfg.recipe.steps.len());

    for (i, step) in cfg.recipe.steps.iter().enumerate() {
        let index = i + 1;
        log.emit(RunEvent::StepStarted {
            index,
            kind: step.kind().to_string(),
            container: step.container_name().to_string(),
        });

        match dispatch(cfg, step, log) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                log.emit(RunEvent::StepFailed {
                    index,
                    kind: step.kind().to_string(),
                    error: e.to_string(),
                });
                return Err(RecipeError::Step {
                    index,
                    step: step.describe(),
                    source: Box::new(e),
                });
            }
        }
    }

    let total_duration = start.elapsed();
    log.emit(RunEvent::RunCompleted {
        run_id: run_id.clone(),
        steps_completed: outcomes.len(),
        total_seconds: total_duration.as_secs_f64(),
    });

    Ok(RunSummary {
        run_id,
        outcomes,
        total_duration,
    })
}

/// Route a step to its handler.
fn dispatch(cfg: &RunConfig, step: &Step, log: &mut EventLog) -> Result<StepOutcome, RecipeError> {
    match step {
        Step::ContainerCommand(s) => {
            container::run_container_command(cfg.runtime, s, log)?;
            Ok(match s.command {
                ContainerAction::Start => StepOutcome::Started(s.container_name.clone()),
                ContainerAction::Stop => StepOutcome::Stopped(s.container_name.clone()),
            })
        }
        Step::PostgresBackup(s) => {
            backup::backup_postgres(cfg.runtime, s, &cfg.recipe.policy, log)
                .map(StepOutcome::BackedUp)
        }
    }
}

/// Numbered step descriptions, without touching the runtime.
pub fn plan(recipe: &Recipe) -> Vec<String> {
    recipe
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step.describe()))
        .collect()
}
