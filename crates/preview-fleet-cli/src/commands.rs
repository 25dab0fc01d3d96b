//! Command dispatch.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use preview_fleet_control::{
    ControlError, EnvironmentId, LifecycleManager, PreviewConfig, PreviewLifecycle,
};
use preview_fleet_provider::{DryRunProvider, PlatformProvider, ProviderConfig};
use preview_fleet_store::{DryRunStore, RocksStore};
use tokio::time::MissedTickBehavior;

use crate::render;
use crate::{Args, Command};

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Exit 0.
    Success,
    /// Exit 1.
    Failure,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => Self::SUCCESS,
            Status::Failure => Self::FAILURE,
        }
    }
}

/// Build the stack from the environment and run one command.
pub async fn run(args: Args) -> anyhow::Result<Status> {
    let mut config = PreviewConfig::from_env().context("invalid configuration")?;
    config.dry_run |= args.dry_run;

    let provider = PlatformProvider::new(
        ProviderConfig::from_env().context("invalid provider configuration")?,
    )
    .context("failed to build provider clients")?;
    let store = RocksStore::open(&args.data_dir).with_context(|| {
        format!(
            "failed to open metadata store at {}",
            args.data_dir.display()
        )
    })?;

    if config.dry_run {
        tracing::warn!("Dry run: no resources or records will be changed");
        let manager = LifecycleManager::new(
            Arc::new(DryRunProvider::new(provider)),
            Arc::new(DryRunStore::new(store)),
            config,
        )?;
        execute(&manager, args.command).await
    } else {
        let manager = LifecycleManager::new(Arc::new(provider), Arc::new(store), config)?;
        execute(&manager, args.command).await
    }
}

/// Run one command against a lifecycle implementation.
pub async fn execute<L: PreviewLifecycle>(manager: &L, command: Command) -> anyhow::Result<Status> {
    match command {
        Command::Create { pr_number, branch } => create(manager, pr_number, &branch).await,
        Command::Delete { preview_name } => {
            let id = EnvironmentId::parse(&preview_name)
                .map_err(ControlError::from)
                .with_context(|| format!("{preview_name:?} is not a preview environment name"))?;
            let result = manager.delete(&id).await?;
            print!("{}", render::deletion(&result));
            Ok(Status::Success)
        }
        Command::List { detailed } => {
            let list = manager.list().await?;
            let capacity = manager.capacity()?;
            print!("{}", render::list(&list, capacity, detailed, Utc::now()));
            Ok(Status::Success)
        }
        Command::Cleanup => {
            let report = manager.cleanup().await?;
            print!("{}", render::cleanup(&report));
            Ok(Status::Success)
        }
        Command::Monitor => {
            let report = manager.monitor().await?;
            print!("{}", render::health(&report));
            Ok(Status::Success)
        }
        Command::Watch { interval_minutes } => {
            watch(manager, Duration::from_secs(interval_minutes.saturating_mul(60))).await;
            Ok(Status::Success)
        }
    }
}

async fn create<L: PreviewLifecycle>(manager: &L, pr_number: u32, branch: &str) -> anyhow::Result<Status> {
    match manager.create(pr_number, branch).await {
        Ok(record) => {
            print!("{}", render::created(&record));
            Ok(Status::Success)
        }
        Err(e) => {
            tracing::error!(pr_number, error = %e, "Create failed");
            eprintln!("error: {e}");
            if let ControlError::ProvisioningError { source, .. } = &e {
                eprintln!("  caused by: {source}");
            }
            Ok(Status::Failure)
        }
    }
}

/// Run cleanup then monitor every `interval` until Ctrl-C.
async fn watch<L: PreviewLifecycle>(manager: &L, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_minutes = interval.as_secs() / 60, "Watching preview environments");

    loop {
        tokio::select! {
            _ = ticker.tick() => cycle(manager).await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted; stopping watch");
                return;
            }
        }
    }
}

async fn cycle<L: PreviewLifecycle>(manager: &L) {
    match manager.cleanup().await {
        Ok(report) => print!("{}", render::cleanup(&report)),
        Err(e) => tracing::error!(error = %e, "Cleanup cycle failed"),
    }
    match manager.monitor().await {
        Ok(report) => print!("{}", render::health(&report)),
        Err(e) => tracing::error!(error = %e, "Monitor cycle failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preview_fleet_provider::{MockProvider, Operation};
    use tempfile::TempDir;

    fn manager() -> (LifecycleManager<MockProvider, RocksStore>, Arc<MockProvider>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provider = Arc::new(MockProvider::new());
        let manager =
            LifecycleManager::new(Arc::clone(&provider), store, PreviewConfig::default()).unwrap();
        (manager, provider, dir)
    }

    #[tokio::test]
    async fn failed_create_exits_non_zero() {
        let (manager, provider, _dir) = manager();
        provider.fail_on(Operation::DeployWorker);

        let code = execute(
            &manager,
            Command::Create {
                pr_number: 1,
                branch: "main".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(code, Status::Failure);
    }

    #[tokio::test]
    async fn create_then_delete_succeeds() {
        let (manager, provider, _dir) = manager();

        let create = Command::Create {
            pr_number: 2,
            branch: "feature/x".into(),
        };
        assert_eq!(execute(&manager, create).await.unwrap(), Status::Success);
        assert_eq!(provider.worker_names(), vec!["pr-2-feature-x"]);

        let delete = Command::Delete {
            preview_name: "pr-2-feature-x".into(),
        };
        assert_eq!(execute(&manager, delete).await.unwrap(), Status::Success);
        assert!(provider.worker_names().is_empty());
    }

    #[tokio::test]
    async fn delete_rejects_foreign_names() {
        let (manager, _provider, _dir) = manager();
        let delete = Command::Delete {
            preview_name: "production".into(),
        };
        assert!(execute(&manager, delete).await.is_err());
    }

    #[tokio::test]
    async fn reconciliation_commands_succeed_with_errors() {
        let (manager, provider, _dir) = manager();
        provider.fail_on(Operation::ListWorkers);

        assert_eq!(
            execute(&manager, Command::Cleanup).await.unwrap(),
            Status::Success
        );
        assert_eq!(
            execute(&manager, Command::Monitor).await.unwrap(),
            Status::Success
        );
        assert_eq!(
            execute(&manager, Command::List { detailed: true }).await.unwrap(),
            Status::Success
        );
    }
}
