//! DH-010: Container runtime abstraction (lookup, lifecycle and streaming exec).

pub mod docker;
pub mod memory;

use crate::core::error::RecipeError;

/// A resolved container handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Runtime identifier
    pub id: String,
    /// Name without the leading `/`
    pub name: String,
    /// Whether the container was running when it was resolved
    pub running: bool,
}

/// One demultiplexed piece of exec output. Either side may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecChunk {
    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: bytes.into(),
            stderr: Vec::new(),
        }
    }

    pub fn stderr(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: bytes.into(),
        }
    }
}

/// Lazy exec output, ending when the process exits.
/// A failing process ends the stream with an `Err` item.
pub type ExecStream = Box<dyn Iterator<Item = Result<ExecChunk, RecipeError>>>;

/// The operations recipes need from a container runtime.
pub trait ContainerRuntime {
    /// Resolve a container by name. `NotFound` if there is none.
    fn get_container(&self, name: &str) -> Result<Container, RecipeError>;

    fn start(&self, container: &Container) -> Result<(), RecipeError>;

    fn stop(&self, container: &Container) -> Result<(), RecipeError>;

    /// Run `cmd` inside the container and stream its output.
    fn exec(&self, container: &Container, cmd: &[String]) -> Result<ExecStream, RecipeError>;
}

impl<T: ContainerRuntime + ?Sized> ContainerRuntime for &T {
    fn get_container(&self, name: &str) -> Result<Container, RecipeError> {
        (**self).get_container(name)
    }

    fn start(&self, container: &Container) -> Result<(), RecipeError> {
        (**self).start(container)
    }

    fn stop(&self, container: &Container) -> Result<(), RecipeError> {
        (**self).stop(container)
    }

    fn exec(&self, container: &Container, cmd: &[String]) -> Result<ExecStream, RecipeError> {
        (**self).exec(container, cmd)
    }
}
