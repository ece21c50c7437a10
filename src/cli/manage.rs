use crate::container::STOP_GRACE;
use crate::domain::ContainerRuntime;
use anyhow::Result;
use clap::Subcommand;
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum ManageAction {
    /// Stop a named container (kept for reuse)
    Stop { name: String },
    /// Remove a named container and its anonymous volumes
    Rm { name: String },
}

pub async fn run(action: ManageAction, runtime: &dyn ContainerRuntime) -> Result<()> {
    match action {
        ManageAction::Stop { name } => stop(runtime, &name).await,
        ManageAction::Rm { name } => remove(runtime, &name).await,
    }
}

pub async fn stop(runtime: &dyn ContainerRuntime, name: &str) -> Result<()> {
    let Some(id) = runtime.find_by_name(name).await? else {
        warn!("container {name} does not exist");
        return Ok(());
    };

    if !runtime.is_running(&id).await? {
        warn!("container {name} is already stopped");
        return Ok(());
    }

    info!("stopping {name}");
    runtime.stop(&id, STOP_GRACE).await
}

pub async fn remove(runtime: &dyn ContainerRuntime, name: &str) -> Result<()> {
    let Some(id) = runtime.find_by_name(name).await? else {
        warn!("container {name} does not exist");
        return Ok(());
    };

    info!("removing {name}");
    runtime.remove(&id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContainerState;
    use crate::test_support::MockRuntime;

    #[tokio::test]
    async fn test_stop_running_container_by_name() {
        let mock = MockRuntime::new();
        let id = mock.add_container("tnt", ContainerState::Running);

        stop(&mock, "tnt").await.unwrap();

        assert_eq!(mock.get_state(&id), Some(ContainerState::Stopped));
        assert!(mock.get_commands().contains(&format!("stop:{id}:5s")));
    }

    #[tokio::test]
    async fn test_stop_skips_stopped_and_missing_containers() {
        let mock = MockRuntime::new();
        mock.add_container("tnt", ContainerState::Stopped);

        stop(&mock, "tnt").await.unwrap();
        stop(&mock, "ghost").await.unwrap();

        assert!(!mock.get_commands().iter().any(|c| c.starts_with("stop:")));
    }

    #[tokio::test]
    async fn test_remove_by_name() {
        let mock = MockRuntime::new();
        let id = mock.add_container("tnt", ContainerState::Stopped);

        run(ManageAction::Rm { name: "tnt".into() }, &mock)
            .await
            .unwrap();
        run(ManageAction::Rm { name: "tnt".into() }, &mock)
            .await
            .unwrap();

        assert_eq!(mock.get_state(&id), None);
    }
}
