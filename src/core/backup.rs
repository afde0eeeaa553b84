//! DH-006: Streaming Postgres backup.
//!
//! Runs `pg_dumpall` inside the container and pipes its stdout through a
//! gzip sink chunk by chunk, in the order the runtime delivers it. At most
//! one chunk is in hand at a time, so memory does not grow with dump size.

use super::archive::ArchiveWriter;
use super::error::RecipeError;
use super::types::{Policy, PostgresBackupStep, StderrCapture};
use crate::events::{EventLog, RunEvent};
use crate::runtime::{ContainerRuntime, ExecChunk};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What a finished backup produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupReport {
    pub archive: PathBuf,
    /// Uncompressed stdout bytes written into the archive
    pub bytes_written: u64,
    /// Stderr bytes seen (never archived)
    pub stderr_bytes: u64,
    pub compressed_bytes: u64,
    pub digest: String,
    pub duration: Duration,
}

/// Dump every database in the step's container into its archive.
pub fn backup_postgres(
    runtime: &dyn ContainerRuntime,
    step: &PostgresBackupStep,
    policy: &Policy,
    log: &mut EventLog,
) -> Result<BackupReport, RecipeError> {
    let start = Instant::now();
    let container = runtime.get_container(&step.container_name)?;

    // Exec first: a refused exec must not leave an archive behind.
    let stream = runtime.exec(&container, &step.dump_command())?;

    let mut archive = ArchiveWriter::create(
        &step.output_archive,
        policy.compression_level,
        policy.atomic_publish,
    )?;

    let mut bytes_written = 0u64;
    let mut stderr_bytes = 0u64;

    for item in stream {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => return Err(abandon(archive, policy, e)),
        };
        if let Err(e) = handle_stderr(&chunk, &container.name, policy.stderr, log) {
            return Err(abandon(archive, policy, e));
        }
        stderr_bytes += chunk.stderr.len() as u64;

        if !chunk.stdout.is_empty() {
            if let Err(e) = archive.write_all(&chunk.stdout) {
                return Err(abandon(archive, policy, e));
            }
            bytes_written += chunk.stdout.len() as u64;
        }
    }

    let summary = archive.finish()?;
    let duration = start.elapsed();

    log.emit(RunEvent::BackupCompleted {
        container: container.name.clone(),
        archive: summary.path.display().to_string(),
        bytes_written,
        compressed_bytes: summary.compressed_bytes,
        digest: summary.digest.clone(),
        duration_seconds: duration.as_secs_f64(),
    });

    Ok(BackupReport {
        archive: summary.path,
        bytes_written,
        stderr_bytes,
        compressed_bytes: summary.compressed_bytes,
        digest: summary.digest,
        duration,
    })
}

/// Apply the stderr policy to one chunk.
fn handle_stderr(
    chunk: &ExecChunk,
    container: &str,
    capture: StderrCapture,
    log: &mut EventLog,
) -> Result<(), RecipeError> {
    if chunk.stderr.is_empty() {
        return Ok(());
    }
    match capture {
        StderrCapture::Discard => Ok(()),
        StderrCapture::Log => {
            log.emit(RunEvent::StderrOutput {
                container: container.to_string(),
                text: String::from_utf8_lossy(&chunk.stderr).into_owned(),
            });
            Ok(())
        }
        StderrCapture::Fail => Err(RecipeError::Runtime(format!(
            "dump in {} wrote to stderr: {}",
            container,
            String::from_utf8_lossy(&chunk.stderr).trim()
        ))),
    }
}

/// Drop an unfinished archive and note where its bytes went.
fn abandon(archive: ArchiveWriter, policy: &Policy, err: RecipeError) -> RecipeError {
    let path = archive.write_path().display().to_string();
    archive.abort();
    if policy.atomic_publish {
        err
    } else {
        RecipeError::Runtime(format!("{} (truncated archive left at {})", err, path))
    }
}
