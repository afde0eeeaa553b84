//! DH-001: Recipe model types.
//!
//! A recipe is an ordered list of steps run against named containers.
//! Execution order is declaration order. Types are built once by the
//! loader and are read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Recipe
// ============================================================================

/// A loaded, validated recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    /// Execution policy
    pub policy: Policy,

    /// Steps in declaration (= execution) order
    pub steps: Vec<Step>,
}

/// One operation within a recipe. Closed set of kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    ContainerCommand(ContainerCommandStep),
    PostgresBackup(PostgresBackupStep),
}

impl Step {
    /// Name of the container this step acts on.
    pub fn container_name(&self) -> &str {
        match self {
            Self::ContainerCommand(s) => &s.container_name,
            Self::PostgresBackup(s) => &s.container_name,
        }
    }

    /// Stable label for the step kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContainerCommand(_) => "container_command",
            Self::PostgresBackup(_) => "postgres_backup",
        }
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            Self::ContainerCommand(s) => format!("{} {}", s.command, s.container_name),
            Self::PostgresBackup(s) => format!(
                "backup {} as {} -> {}",
                s.container_name,
                s.postgres_user,
                s.output_archive.display()
            ),
        }
    }
}

// ============================================================================
// Container lifecycle
// ============================================================================

/// Start or stop a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCommandStep {
    pub container_name: String,
    pub command: ContainerAction,
}

/// Lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    Start,
    Stop,
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

// ============================================================================
// Postgres backup
// ============================================================================

/// Logical dump of every database in a Postgres container into a gzip archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresBackupStep {
    pub container_name: String,

    /// Role the dump runs as
    pub postgres_user: String,

    /// Destination archive. Must not exist when the recipe is loaded.
    pub output_archive: PathBuf,
}

impl PostgresBackupStep {
    /// Command run inside the container: dump all, clean first, as the configured user.
    pub fn dump_command(&self) -> Vec<String> {
        vec![
            "pg_dumpall".to_string(),
            "-c".to_string(),
            "-U".to_string(),
            self.postgres_user.clone(),
        ]
    }

    /// Where the archive is written before it is renamed into place.
    pub fn partial_path(&self) -> PathBuf {
        partial_path(&self.output_archive)
    }
}

/// `<archive>.partial` alongside the archive.
pub fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy, from the optional `policy` mapping of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// What to do with standard error of the dump command
    #[serde(default)]
    pub stderr: StderrCapture,

    /// Write to `<archive>.partial` and rename into place on success
    #[serde(default = "default_true")]
    pub atomic_publish: bool,

    /// gzip level, 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            stderr: StderrCapture::default(),
            atomic_publish: true,
            compression_level: default_compression_level(),
        }
    }
}

/// Command-line adjustments applied to the document's policy before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    pub stderr: Option<StderrCapture>,
    pub atomic_publish: Option<bool>,
}

impl PolicyOverrides {
    pub fn apply(&self, policy: &mut Policy) {
        if let Some(stderr) = self.stderr {
            policy.stderr = stderr;
        }
        if let Some(atomic) = self.atomic_publish {
            policy.atomic_publish = atomic;
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> u32 {
    6
}

/// Disposition of standard-error chunks from a dump.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum StderrCapture {
    /// Drop stderr (counted, never written anywhere)
    #[default]
    Discard,
    /// Forward each stderr chunk to the event log
    Log,
    /// Abort the backup on the first non-empty stderr chunk
    Fail,
}

impl fmt::Display for StderrCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discard => write!(f, "discard"),
            Self::Log => write!(f, "log"),
            Self::Fail => write!(f, "fail"),
        }
    }
}
