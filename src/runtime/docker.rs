//! DH-011: Docker runtime over the Engine API.
//!
//! The async `bollard` client is driven from a current-thread tokio runtime
//! owned by the handle. Every call blocks the caller and nothing runs between
//! calls. Exec output is pulled one multiplexed frame at a time, so the
//! daemon connection itself applies backpressure.

use super::{Container, ContainerRuntime, ExecChunk, ExecStream};
use crate::core::error::RecipeError;
use bollard::container::{LogOutput, StartContainerOptions, StopContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerInspectResponse;
use bollard::Docker;
use futures::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Bytes of stderr kept for the error message of a failed exec.
const STDERR_TAIL: usize = 1024;

/// Seconds the daemon waits for a clean stop before killing.
const STOP_TIMEOUT: i64 = 10;

/// Seconds before an API request gives up.
const REQUEST_TIMEOUT: u64 = 120;

type FrameStream = Pin<Box<dyn Stream<Item = Result<LogOutput, DockerError>> + Send>>;

/// Runtime backed by a Docker daemon.
pub struct DockerApi {
    docker: Docker,
    rt: Arc<Runtime>,
}

impl DockerApi {
    /// Connect to the daemon at the unix socket `socket`, or to the local
    /// default (`DOCKER_HOST`, then `/var/run/docker.sock`).
    ///
    /// No request is made here; an unreachable daemon surfaces on first use.
    pub fn connect(socket: Option<&Path>) -> Result<Self, RecipeError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RecipeError::io("failed to start the docker client runtime", e))?;

        let docker = {
            let _guard = rt.enter();
            match socket {
                Some(path) => Docker::connect_with_socket(
                    &path.to_string_lossy(),
                    REQUEST_TIMEOUT,
                    bollard::API_DEFAULT_VERSION,
                ),
                None => Docker::connect_with_local_defaults(),
            }
        }
        .map_err(|e| docker_error("connecting to the docker daemon", e))?;

        Ok(Self {
            docker,
            rt: Arc::new(rt),
        })
    }
}

/// Map a client error, keeping I/O failures as I/O.
fn docker_error(context: &str, e: DockerError) -> RecipeError {
    match e {
        DockerError::IOError { err } => RecipeError::io(context, err),
        other => RecipeError::Runtime(format!("{}: {}", context, other)),
    }
}

fn lookup_error(name: &str, e: DockerError) -> RecipeError {
    match e {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RecipeError::NotFound {
            container: name.to_string(),
        },
        other => docker_error(&format!("inspecting {}", name), other),
    }
}

/// 304: the container is already in the requested state.
fn lifecycle_result(context: &str, result: Result<(), DockerError>) -> Result<(), RecipeError> {
    match result {
        Ok(())
        | Err(DockerError::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(e) => Err(docker_error(context, e)),
    }
}

fn ensure_running(container: &Container) -> Result<(), RecipeError> {
    if container.running {
        Ok(())
    } else {
        Err(RecipeError::Runtime(format!(
            "cannot exec in {}: container is not running",
            container.name
        )))
    }
}

fn container_from_inspect(name: &str, resp: ContainerInspectResponse) -> Container {
    Container {
        id: resp.id.unwrap_or_else(|| name.to_string()),
        name: resp
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| name.to_string()),
        running: resp.state.and_then(|s| s.running).unwrap_or(false),
    }
}

impl ContainerRuntime for DockerApi {
    fn get_container(&self, name: &str) -> Result<Container, RecipeError> {
        self.rt
            .block_on(self.docker.inspect_container(name, None))
            .map(|resp| container_from_inspect(name, resp))
            .map_err(|e| lookup_error(name, e))
    }

    fn start(&self, container: &Container) -> Result<(), RecipeError> {
        let result = self.rt.block_on(
            self.docker
                .start_container(&container.id, None::<StartContainerOptions<String>>),
        );
        lifecycle_result(&format!("starting {}", container.name), result)
    }

    fn stop(&self, container: &Container) -> Result<(), RecipeError> {
        let options = StopContainerOptions { t: STOP_TIMEOUT };
        let result = self
            .rt
            .block_on(self.docker.stop_container(&container.id, Some(options)));
        lifecycle_result(&format!("stopping {}", container.name), result)
    }

    fn exec(&self, container: &Container, cmd: &[String]) -> Result<ExecStream, RecipeError> {
        ensure_running(container)?;

        let label = format!("{} in {}", cmd.join(" "), container.name);
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let (exec_id, started) = self
            .rt
            .block_on(async {
                let exec = self.docker.create_exec(&container.id, options).await?;
                let started = self.docker.start_exec(&exec.id, None).await?;
                Ok::<_, DockerError>((exec.id, started))
            })
            .map_err(|e| docker_error(&format!("starting {}", label), e))?;

        let output = match started {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(RecipeError::Runtime(format!(
                    "{} started detached, no output to stream",
                    label
                )))
            }
        };

        Ok(Box::new(ExecFrames::new(
            Arc::clone(&self.rt),
            output,
            ExitProbe::Inspect {
                docker: self.docker.clone(),
                exec_id,
            },
            label,
        )))
    }
}

// ============================================================================
// Demultiplexed exec output
// ============================================================================

/// Where the exit code of a finished exec comes from.
enum ExitProbe {
    Inspect { docker: Docker, exec_id: String },
    #[cfg(test)]
    Known(Option<i64>),
}

impl ExitProbe {
    fn exit_code(self, rt: &Runtime) -> Result<Option<i64>, DockerError> {
        match self {
            Self::Inspect { docker, exec_id } => rt
                .block_on(docker.inspect_exec(&exec_id))
                .map(|r| r.exit_code),
            #[cfg(test)]
            Self::Known(code) => Ok(code),
        }
    }
}

/// Exec output frames mapped to chunks, ending with the exit status.
struct ExecFrames {
    rt: Arc<Runtime>,
    output: FrameStream,
    exit: Option<ExitProbe>,
    stderr_tail: Vec<u8>,
    label: String,
    done: bool,
}

impl ExecFrames {
    fn new(rt: Arc<Runtime>, output: FrameStream, exit: ExitProbe, label: String) -> Self {
        Self {
            rt,
            output,
            exit: Some(exit),
            stderr_tail: Vec::new(),
            label,
            done: false,
        }
    }

    fn keep_tail(&mut self, bytes: &[u8]) {
        self.stderr_tail.extend_from_slice(bytes);
        if self.stderr_tail.len() > STDERR_TAIL {
            let excess = self.stderr_tail.len() - STDERR_TAIL;
            self.stderr_tail.drain(..excess);
        }
    }

    /// Output drained: a non-zero or unknown exit code fails the stream.
    fn finish(&mut self) -> Option<Result<ExecChunk, RecipeError>> {
        let probe = self.exit.take()?;
        let code = match probe.exit_code(&self.rt) {
            Ok(Some(0)) => return None,
            Ok(Some(code)) => code.to_string(),
            Ok(None) => "unknown".to_string(),
            Err(e) => return Some(Err(docker_error(&format!("inspecting {}", self.label), e))),
        };
        Some(Err(RecipeError::Runtime(format!(
            "{} exited with code {}: {}",
            self.label,
            code,
            String::from_utf8_lossy(&self.stderr_tail).trim()
        ))))
    }
}

impl Iterator for ExecFrames {
    type Item = Result<ExecChunk, RecipeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.rt.block_on(self.output.next()) {
                Some(Ok(LogOutput::StdOut { message })) | Some(Ok(LogOutput::Console { message })) => {
                    return Some(Ok(ExecChunk::stdout(message.to_vec())));
                }
                Some(Ok(LogOutput::StdErr { message })) => {
                    self.keep_tail(&message);
                    return Some(Ok(ExecChunk::stderr(message.to_vec())));
                }
                Some(Ok(LogOutput::StdIn { .. })) => continue,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(docker_error(
                        &format!("reading output of {}", self.label),
                        e,
                    )));
                }
                None => {
                    self.done = true;
                    return self.finish();
                }
            }
        }
    }
}
