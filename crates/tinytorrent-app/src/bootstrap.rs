//! Daemon boot sequence.
//!
//! # Design
//! - Environment variables only seed defaults; persisted settings win except for the state path.
//! - The first shutdown signal drains the engine; a second one abandons the drain.
//! - Dependencies are injected so the sequence runs in tests without signals or a global logger.

use std::future::Future;
use std::path::{Path, PathBuf};

use tinytorrent_config::CoreSettings;
use tinytorrent_core::{AsyncTaskService, StubSession};
use tinytorrent_data::PersistenceManager;
use tinytorrent_engine::{EngineHandle, EngineOptions, EngineSetup};
use tinytorrent_events::EventBus;
use tinytorrent_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, Metrics, build_sha};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Default directory for the database, metadata sidecars, and DHT state.
pub const DEFAULT_STATE_DIR: &str = "./state";

/// File name of the state database inside the state directory.
pub const DATABASE_FILE: &str = "tinytorrent.db";

/// Dependencies required to bootstrap the daemon.
#[derive(Debug)]
pub(crate) struct BootstrapDependencies {
    state_dir: PathBuf,
    download_dir: Option<PathBuf>,
    log_level: String,
    log_format: LogFormat,
    options: EngineOptions,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) fn from_env() -> AppResult<Self> {
        Self::from_values(
            std::env::var("TT_STATE_DIR").ok(),
            std::env::var("TT_DOWNLOAD_DIR").ok(),
            std::env::var("TT_LOG_LEVEL").ok(),
            std::env::var("TT_LOG_FORMAT").ok(),
        )
    }

    fn from_values(
        state_dir: Option<String>,
        download_dir: Option<String>,
        log_level: Option<String>,
        log_format: Option<String>,
    ) -> AppResult<Self> {
        let state_dir = match state_dir {
            Some(value) if value.trim().is_empty() => {
                return Err(AppError::InvalidConfig {
                    field: "TT_STATE_DIR",
                    reason: "empty",
                    value: Some(value),
                });
            }
            Some(value) => PathBuf::from(value),
            None => PathBuf::from(DEFAULT_STATE_DIR),
        };
        let download_dir = download_dir
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let log_level = log_level
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_format = log_format.map_or_else(LogFormat::infer, |value| LogFormat::parse(&value));
        Ok(Self {
            state_dir,
            download_dir,
            log_level,
            log_format,
            options: EngineOptions::default(),
        })
    }

    fn bootstrap_settings(&self) -> CoreSettings {
        let mut settings = CoreSettings {
            state_path: self.state_dir.clone(),
            ..CoreSettings::default()
        };
        if let Some(download_dir) = &self.download_dir {
            settings.download_path.clone_from(download_dir);
        }
        settings
    }
}

/// Entry point for the daemon boot sequence.
///
/// # Errors
///
/// Returns an error if logging, persistence, or engine startup fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    tinytorrent_telemetry::init_logging(&LoggingConfig {
        level: &dependencies.log_level,
        format: dependencies.log_format,
        build_sha: build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    run_app_with(dependencies, shutdown_signal(), shutdown_signal).await
}

async fn shutdown_signal() -> AppResult<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::io("signal.ctrl_c", None, err))
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
///
/// `shutdown` resolves when a graceful stop is requested; `force` is armed afterwards and, if it
/// resolves before the drain finishes, the drain is abandoned.
pub(crate) async fn run_app_with<S, F, FF>(
    dependencies: BootstrapDependencies,
    shutdown: S,
    force: F,
) -> AppResult<()>
where
    S: Future<Output = AppResult<()>>,
    F: FnOnce() -> FF,
    FF: Future<Output = AppResult<()>>,
{
    info!(
        state_dir = %dependencies.state_dir.display(),
        "tinytorrent bootstrap starting"
    );
    ensure_dir(&dependencies.state_dir)?;

    let database = dependencies.state_dir.join(DATABASE_FILE);
    let persistence =
        PersistenceManager::open(&database, AsyncTaskService::spawn("persistence"))
            .await
            .map_err(|err| AppError::persistence("persistence.open", err))?;

    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let engine = EngineHandle::start(EngineSetup {
        session: Box::new(StubSession::new()),
        persistence: persistence.clone(),
        settings: dependencies.bootstrap_settings(),
        events: EventBus::new(),
        metrics,
        options: dependencies.options,
    })
    .await
    .map_err(|err| AppError::engine("engine.start", err))?;

    let snapshot = engine.snapshot();
    info!(
        torrents = snapshot.torrents.len(),
        listen = ?engine.listen_endpoint(),
        "tinytorrent engine running"
    );

    shutdown.await?;
    info!("shutdown signal received; draining engine");

    let drain = async {
        engine
            .shutdown()
            .await
            .map_err(|err| AppError::engine("engine.shutdown", err))?;
        persistence.close().await;
        Ok::<(), AppError>(())
    };
    tokio::select! {
        result = drain => {
            result?;
            info!("tinytorrent shutdown complete");
        }
        signal = force() => {
            signal?;
            warn!("second shutdown signal received; exiting without draining");
        }
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> AppResult<()> {
    std::fs::create_dir_all(path)
        .map_err(|err| AppError::io("state_dir.create", Some(path.to_path_buf()), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::{pending, ready};
    use tempfile::TempDir;

    #[test]
    fn environment_values_fill_defaults() -> anyhow::Result<()> {
        let deps = BootstrapDependencies::from_values(None, None, None, None)?;
        assert_eq!(deps.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(deps.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(deps.log_format, LogFormat::infer());
        assert!(deps.download_dir.is_none());

        let deps = BootstrapDependencies::from_values(
            Some("/var/lib/tt".into()),
            Some("/srv/downloads".into()),
            Some("debug".into()),
            Some("json".into()),
        )?;
        let settings = deps.bootstrap_settings();
        assert_eq!(settings.state_path, PathBuf::from("/var/lib/tt"));
        assert_eq!(settings.download_path, PathBuf::from("/srv/downloads"));
        assert_eq!(deps.log_level, "debug");
        assert_eq!(deps.log_format, LogFormat::Json);
        Ok(())
    }

    #[test]
    fn blank_state_dir_is_rejected() {
        let err = BootstrapDependencies::from_values(Some("  ".into()), None, None, None)
            .expect_err("blank state dir");
        assert!(matches!(
            err,
            AppError::InvalidConfig {
                field: "TT_STATE_DIR",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn boot_and_graceful_shutdown_create_the_state_database() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let state_dir = dir.path().join("state");
        let deps = BootstrapDependencies::from_values(
            Some(state_dir.display().to_string()),
            Some(dir.path().join("downloads").display().to_string()),
            None,
            None,
        )?;

        run_app_with(deps, ready(Ok(())), pending::<AppResult<()>>).await?;

        assert!(state_dir.join(DATABASE_FILE).exists());
        Ok(())
    }

    #[tokio::test]
    async fn second_signal_during_the_drain_still_exits_cleanly() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let deps = BootstrapDependencies::from_values(
            Some(dir.path().join("state").display().to_string()),
            Some(dir.path().join("downloads").display().to_string()),
            None,
            None,
        )?;

        run_app_with(deps, ready(Ok(())), || ready(Ok(()))).await?;
        Ok(())
    }
}
