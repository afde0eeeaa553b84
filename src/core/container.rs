//! DH-007: Container lifecycle step.

use super::error::RecipeError;
use super::types::{ContainerAction, ContainerCommandStep};
use crate::events::{EventLog, RunEvent};
use crate::runtime::ContainerRuntime;

/// Resolve the container and start or stop it.
pub fn run_container_command(
    runtime: &dyn ContainerRuntime,
    step: &ContainerCommandStep,
    log: &mut EventLog,
) -> Result<(), RecipeError> {
    let container = runtime.get_container(&step.container_name)?;

    match step.command {
        ContainerAction::Start => {
            runtime.start(&container)?;
            log.emit(RunEvent::ContainerStarted {
                container: container.name,
            });
        }
        ContainerAction::Stop => {
            runtime.stop(&container)?;
            log.emit(RunEvent::ContainerStopped {
                container: container.name,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory::{MemoryRuntime, RuntimeCall};

    fn cmd(name: &str, command: ContainerAction) -> ContainerCommandStep {
        ContainerCommandStep {
            container_name: name.to_string(),
            command,
        }
    }

    #[test]
    fn test_dh007_start_calls_start_only() {
        let rt = MemoryRuntime::new();
        rt.add_container("db1", false);
        let mut log = EventLog::silent();
        run_container_command(&rt, &cmd("db1", ContainerAction::Start), &mut log).unwrap();

        assert_eq!(
            rt.calls(),
            vec![
                RuntimeCall::Get("db1".to_string()),
                RuntimeCall::Start("db1".to_string())
            ]
        );
        assert_eq!(rt.is_running("db1"), Some(true));
        assert_eq!(
            log.events()[0].event,
            RunEvent::ContainerStarted {
                container: "db1".to_string()
            }
        );
    }

    #[test]
    fn test_dh007_stop() {
        let rt = MemoryRuntime::new();
        rt.add_container("db1", true);
        let mut log = EventLog::silent();
        run_container_command(&rt, &cmd("db1", ContainerAction::Stop), &mut log).unwrap();
        assert_eq!(rt.actions(), vec![RuntimeCall::Stop("db1".to_string())]);
        assert_eq!(log.events()[0].event.to_string(), "Stopped container db1");
    }

    #[test]
    fn test_dh007_missing_container() {
        let rt = MemoryRuntime::new();
        let mut log = EventLog::silent();
        let err =
            run_container_command(&rt, &cmd("ghost", ContainerAction::Stop), &mut log).unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(rt.actions().is_empty());
        assert!(log.events().is_empty());
    }
}
