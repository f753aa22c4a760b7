//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                                          |
//! |------------|-----------------------------------------------------------|
//! | `projects` | `Init`, `Projects`, `CreateProject`, `DeleteProject`      |
//! | `samples`  | `AddSample`, `DeleteSample`                               |
//! | `analyze`  | `Analyze`, `AnalyzeAll`                                   |
//! | `config`   | `Config`                                                  |

pub mod analyze;
pub mod config;
pub mod projects;
pub mod samples;

pub use analyze::{cmd_analyze, cmd_analyze_all};
pub use config::cmd_config;
pub use projects::{cmd_create_project, cmd_delete_project, cmd_init, cmd_projects};
pub use samples::{cmd_add_samples, cmd_delete_sample};

use anyhow::Result;
use omniqc::config::{CliOverrides, Config};
use omniqc::service::QcService;
use std::path::Path;

use crate::Cli;

/// Resolve configuration from file, environment and command line.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<Config> {
    let overrides = CliOverrides {
        analyzer: cli.analyzer.clone(),
        store: cli.store.clone(),
        timeout_secs: cli.timeout,
    };
    Config::load(project_dir, cli.config.clone(), &overrides)
}

/// Build the service and prepare the store. Ctrl-C cancels running work.
pub async fn connect(cli: &Cli, project_dir: &Path) -> Result<QcService> {
    let config = load_config(cli, project_dir)?;
    let service = QcService::from_config(&config);
    service.init().await;

    let shutdown = service.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });
    Ok(service)
}

/// Ask before a destructive action unless `yes` was given.
pub fn confirm(prompt: &str, yes: bool) -> bool {
    if yes {
        return true;
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}
