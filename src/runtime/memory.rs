//! DH-012: In-memory runtime that records calls and replays scripted exec output.
//!
//! Used by tests and benchmarks in place of a live daemon. Single-threaded:
//! state lives behind `RefCell` because the runtime trait takes `&self`.

use super::{Container, ContainerRuntime, ExecChunk, ExecStream};
use crate::core::error::RecipeError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;

/// A runtime call, as recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Get(String),
    Start(String),
    Stop(String),
    Exec(String, Vec<String>),
}

/// Scripted output for `exec` against one container.
#[derive(Debug, Clone, Default)]
struct ExecScript {
    chunks: Vec<ExecChunk>,
    /// Refuse to start the exec with this message
    start_error: Option<String>,
    /// Fail with an I/O error after this many chunks
    fail_after: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryRuntime {
    running: RefCell<HashMap<String, bool>>,
    scripts: RefCell<HashMap<String, ExecScript>>,
    calls: RefCell<Vec<RuntimeCall>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container.
    pub fn add_container(&self, name: &str, running: bool) {
        self.running.borrow_mut().insert(name.to_string(), running);
    }

    /// Output the next `exec` against `name` will stream.
    pub fn script_exec(&self, name: &str, chunks: Vec<ExecChunk>) {
        self.scripts.borrow_mut().entry(name.to_string()).or_default().chunks = chunks;
    }

    /// Make `exec` against `name` fail before any output.
    pub fn fail_exec_start(&self, name: &str, message: &str) {
        self.scripts
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .start_error = Some(message.to_string());
    }

    /// Interrupt the exec stream for `name` after `n` chunks.
    pub fn fail_exec_after(&self, name: &str, n: usize) {
        self.scripts
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .fail_after = Some(n);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.borrow().clone()
    }

    /// Calls other than lookups.
    pub fn actions(&self) -> Vec<RuntimeCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| !matches!(c, RuntimeCall::Get(_)))
            .cloned()
            .collect()
    }

    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.running.borrow().get(name).copied()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.borrow_mut().push(call);
    }

    fn set_running(&self, container: &Container, running: bool) -> Result<(), RecipeError> {
        match self.running.borrow_mut().get_mut(&container.name) {
            Some(state) => {
                *state = running;
                Ok(())
            }
            None => Err(RecipeError::NotFound {
                container: container.name.clone(),
            }),
        }
    }
}

impl ContainerRuntime for MemoryRuntime {
    fn get_container(&self, name: &str) -> Result<Container, RecipeError> {
        self.record(RuntimeCall::Get(name.to_string()));
        match self.running.borrow().get(name) {
            Some(&running) => Ok(Container {
                id: format!("mem-{}", name),
                name: name.to_string(),
                running,
            }),
            None => Err(RecipeError::NotFound {
                container: name.to_string(),
            }),
        }
    }

    fn start(&self, container: &Container) -> Result<(), RecipeError> {
        self.record(RuntimeCall::Start(container.name.clone()));
        self.set_running(container, true)
    }

    fn stop(&self, container: &Container) -> Result<(), RecipeError> {
        self.record(RuntimeCall::Stop(container.name.clone()));
        self.set_running(container, false)
    }

    fn exec(&self, container: &Container, cmd: &[String]) -> Result<ExecStream, RecipeError> {
        self.record(RuntimeCall::Exec(container.name.clone(), cmd.to_vec()));
        let script = self
            .scripts
            .borrow()
            .get(&container.name)
            .cloned()
            .unwrap_or_default();

        if let Some(msg) = script.start_error {
            return Err(RecipeError::Runtime(msg));
        }

        let name = container.name.clone();
        let fail_after = script.fail_after;
        let mut served = 0usize;
        let mut chunks = script.chunks.into_iter();

        Ok(Box::new(std::iter::from_fn(move || {
            if served == usize::MAX {
                return None;
            }
            if fail_after == Some(served) {
                served = usize::MAX;
                return Some(Err(RecipeError::io(
                    format!("exec stream from {} interrupted", name),
                    io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"),
                )));
            }
            served += 1;
            chunks.next().map(Ok)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dh012_lookup_missing() {
        let rt = MemoryRuntime::new();
        let err = rt.get_container("ghost").unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(rt.calls(), vec![RuntimeCall::Get("ghost".to_string())]);
    }

    #[test]
    fn test_dh012_lifecycle_tracks_state() {
        let rt = MemoryRuntime::new();
        rt.add_container("db1", true);
        let c = rt.get_container("db1").unwrap();
        rt.stop(&c).unwrap();
        assert_eq!(rt.is_running("db1"), Some(false));
        rt.start(&c).unwrap();
        assert_eq!(rt.is_running("db1"), Some(true));
        assert_eq!(
            rt.actions(),
            vec![
                RuntimeCall::Stop("db1".to_string()),
                RuntimeCall::Start("db1".to_string())
            ]
        );
    }

    #[test]
    fn test_dh012_exec_replays_script() {
        let rt = MemoryRuntime::new();
        rt.add_container("db1", true);
        rt.script_exec(
            "db1",
            vec![ExecChunk::stdout(&b"a"[..]), ExecChunk::stderr(&b"b"[..])],
        );
        let c = rt.get_container("db1").unwrap();
        let chunks: Vec<_> = rt
            .exec(&c, &["true".to_string()])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].stdout, b"a");
        assert_eq!(chunks[1].stderr, b"b");
    }

    #[test]
    fn test_dh012_exec_interrupted() {
        let rt = MemoryRuntime::new();
        rt.add_container("db1", true);
        rt.script_exec("db1", vec![ExecChunk::stdout(&b"a"[..]); 3]);
        rt.fail_exec_after("db1", 1);
        let c = rt.get_container("db1").unwrap();
        let items: Vec<_> = rt.exec(&c, &[]).unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().kind(), "io");
    }

    #[test]
    fn test_dh012_exec_start_failure() {
        let rt = MemoryRuntime::new();
        rt.add_container("db1", false);
        rt.fail_exec_start("db1", "container db1 is not running");
        let c = rt.get_container("db1").unwrap();
        let err = rt.exec(&c, &[]).err().unwrap();
        assert_eq!(err.to_string(), "container db1 is not running");
    }
}
